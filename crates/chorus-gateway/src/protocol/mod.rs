//! Gateway protocol definitions
//!
//! Op codes, the message envelope, control payloads, and close codes.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{CloseAction, CloseCode, ABNORMAL_CLOSURE, NORMAL_CLOSURE};
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{
    HelloPayload, IdentifyPayload, IdentifyProperties, RequestMembersPayload, ResumePayload,
    StatusUpdatePayload,
};
