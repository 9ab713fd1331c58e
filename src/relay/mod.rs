pub mod gateway;
pub mod ids;
pub mod protocol;
pub mod registry;

pub use gateway::{Attribution, ConnectionState, EventSender, SessionGateway};
pub use ids::ConnectionId;
pub use protocol::{ClientEvent, Participant, Role, ServerEvent};
pub use registry::{AdmissionPolicy, OneSeatPerRole, OpenAdmission, Registry};
