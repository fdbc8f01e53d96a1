//! BOOTP-framed DHCP packet codec and the option-interpretation helpers the
//! boot decision engine relies on to classify a client.

pub mod options;
pub mod packet;

pub use options::{client_arch, client_guid, is_pxe_client, parameter_request_list, user_class};
pub use packet::{BootpHeader, DhcpPacket, MIN_PACKET_SIZE, OP_BOOTREPLY, OP_BOOTREQUEST};
