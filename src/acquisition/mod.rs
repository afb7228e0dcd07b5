pub mod group;
pub mod socket;
pub mod subscription;

pub use group::GroupWorker;
pub use socket::{Datagram, DatagramSource, UdpEndpoint};
pub use subscription::Acquisition;
