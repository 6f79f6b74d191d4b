//! 消息总线消息类型定义
//!
//! [`BusMessage`] is the envelope carried on the durable topic between the
//! producer and the event router. The payload is a JSON-encoded
//! [`Event`](crate::execution::Event); metadata carries cross-hop context
//! such as the correlation id.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::execution::{Event, StreamKey};

/// Metadata key for the correlation id
pub const CORRELATION_ID_KEY: &str = "correlation_id";

/// 消息总线消息体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Unique message id (for tracing / dedup)
    pub message_id: Uuid,
    /// Stream the payload belongs to
    pub stream_key: StreamKey,
    /// Publish time (Unix milliseconds)
    pub published_at: i64,
    /// Cross-hop context
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// JSON-encoded event
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(stream_key: StreamKey, payload: Vec<u8>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            stream_key,
            published_at: crate::util::now_millis(),
            metadata: BTreeMap::new(),
            payload,
        }
    }

    /// 创建事件消息
    pub fn event(stream_key: StreamKey, event: &Event) -> Result<Self, serde_json::Error> {
        Ok(Self::new(stream_key, serde_json::to_vec(event)?))
    }

    /// 设置元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 设置关联 ID
    pub fn with_correlation_id(self, id: impl Into<String>) -> Self {
        self.with_metadata(CORRELATION_ID_KEY, id)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata
            .get(CORRELATION_ID_KEY)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    /// 解析载荷为指定类型
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    pub fn parse_event(&self) -> Result<Event, serde_json::Error> {
        self.parse_payload()
    }
}
