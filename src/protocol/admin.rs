//! Subset of the Meshtastic `AdminMessage` used by the state layer.
//!
//! Field tags match `meshtastic/admin.proto` so the encoded bytes are accepted by
//! firmware as-is.

use prost::Message;

use crate::types::NodeNum;

#[derive(Clone, PartialEq, Message)]
pub struct AdminMessage {
    #[prost(oneof = "admin_message::PayloadVariant", tags = "38, 39, 40, 47, 48")]
    pub payload_variant: Option<admin_message::PayloadVariant>,
    /// Passkey from the last admin response, required by firmware for remote admin.
    #[prost(bytes = "vec", tag = "101")]
    pub session_passkey: Vec<u8>,
}

pub mod admin_message {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(uint32, tag = "38")]
        RemoveByNodenum(u32),
        #[prost(uint32, tag = "39")]
        SetFavoriteNode(u32),
        #[prost(uint32, tag = "40")]
        RemoveFavoriteNode(u32),
        #[prost(uint32, tag = "47")]
        SetIgnoredNode(u32),
        #[prost(uint32, tag = "48")]
        RemoveIgnoredNode(u32),
    }
}

use admin_message::PayloadVariant;

impl AdminMessage {
    fn with(variant: PayloadVariant) -> Self {
        Self {
            payload_variant: Some(variant),
            session_passkey: Vec::new(),
        }
    }

    pub fn favorite(node: NodeNum, is_favorite: bool) -> Self {
        if is_favorite {
            Self::with(PayloadVariant::SetFavoriteNode(node))
        } else {
            Self::with(PayloadVariant::RemoveFavoriteNode(node))
        }
    }

    pub fn ignored(node: NodeNum, is_ignored: bool) -> Self {
        if is_ignored {
            Self::with(PayloadVariant::SetIgnoredNode(node))
        } else {
            Self::with(PayloadVariant::RemoveIgnoredNode(node))
        }
    }

    pub fn remove_node(node: NodeNum) -> Self {
        Self::with(PayloadVariant::RemoveByNodenum(node))
    }

    /// Short name for log lines.
    pub fn describe(&self) -> String {
        match &self.payload_variant {
            Some(PayloadVariant::RemoveByNodenum(n)) => format!("remove_by_nodenum !{:08x}", n),
            Some(PayloadVariant::SetFavoriteNode(n)) => format!("set_favorite_node !{:08x}", n),
            Some(PayloadVariant::RemoveFavoriteNode(n)) => {
                format!("remove_favorite_node !{:08x}", n)
            }
            Some(PayloadVariant::SetIgnoredNode(n)) => format!("set_ignored_node !{:08x}", n),
            Some(PayloadVariant::RemoveIgnoredNode(n)) => {
                format!("remove_ignored_node !{:08x}", n)
            }
            None => "empty".to_string(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }
}
