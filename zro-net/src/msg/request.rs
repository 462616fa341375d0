//! Payload structs.

use zro_core::{Args, Call, Kwargs, Value};

use super::Payload;

pub(crate) const GET: &str = "get";
pub(crate) const SET: &str = "set";
pub(crate) const RUN: &str = "run";
pub(crate) const IS_CALLABLE: &str = "is_callable";
pub(crate) const PLATFORM_INFO: &str = "platform_info";
pub(crate) const WORK: &str = "work";
pub(crate) const RESULT: &str = "result";
pub const REGISTER_FOR_MESSAGE: &str = "register_for_message";
pub const DEREGISTER_FOR_MESSAGE: &str = "deregister_for_message";

/// Reads an attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetRequest {
    pub name: String,
}
impl Payload for GetRequest {
    const KIND: &'static str = GET;
}

/// Writes an attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetRequest {
    pub name: String,
    pub value: Value,
}
impl Payload for SetRequest {
    const KIND: &'static str = SET;
}

/// Calls a method.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub callable: String,
    #[serde(default)]
    pub args: Args,
    #[serde(default)]
    pub kwargs: Kwargs,
}
impl Payload for RunRequest {
    const KIND: &'static str = RUN;
}

impl RunRequest {
    pub fn into_call(self) -> (String, Call) {
        (self.callable, Call::new(self.args, self.kwargs))
    }
}

/// Checks whether a member is callable, without calling it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IsCallableRequest {
    pub name: String,
}
impl Payload for IsCallableRequest {
    const KIND: &'static str = IS_CALLABLE;
}

/// Asks for the platform info record. Carries no arguments.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformInfoRequest {}
impl Payload for PlatformInfoRequest {
    const KIND: &'static str = PLATFORM_INFO;
}

/// Unit of work sent from a producer to consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkPacket {
    pub work: Value,
    pub id: Value,
}
impl Payload for WorkPacket {
    const KIND: &'static str = WORK;
}

/// Processed work sent from a consumer to the sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultPacket {
    pub data: Value,
    pub id: Value,
}
impl Payload for ResultPacket {
    const KIND: &'static str = RESULT;
}

/// Asks the router to deliver messages with the given id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisterForMessage {
    pub message_id: String,
}
impl Payload for RegisterForMessage {
    const KIND: &'static str = REGISTER_FOR_MESSAGE;
}

/// Asks the router to stop delivering messages with the given id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeregisterForMessage {
    pub message_id: String,
}
impl Payload for DeregisterForMessage {
    const KIND: &'static str = DEREGISTER_FOR_MESSAGE;
}
