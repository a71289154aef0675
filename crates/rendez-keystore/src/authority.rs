//! Adapter from the key store to the router's authority seam

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rendez_proto::{Frame, FrameType};
use rendez_router::Authority;

use crate::store::{AclAction, KeyStore};

/// Routes permission checks to a [`KeyStore`]: dialing a channel needs
/// invoke rights, registering it (and answering its bridges) needs listen
/// rights. Nop and Close are never legal greeting frames, so they are
/// denied outright.
pub struct KeyStoreAuthority {
    store: Arc<KeyStore>,
}

impl KeyStoreAuthority {
    pub fn new(store: Arc<KeyStore>) -> KeyStoreAuthority {
        KeyStoreAuthority { store }
    }
}

impl Authority for KeyStoreAuthority {
    fn check_permission(&self, frame: &Frame, credential: &[u8]) -> bool {
        match frame.frame_type {
            FrameType::Dial => {
                self.store
                    .check_permission(AclAction::Invoke, &frame.channel, credential)
            }
            FrameType::Listen | FrameType::Bridge => {
                self.store
                    .check_permission(AclAction::Listen, &frame.channel, credential)
            }
            FrameType::Nop | FrameType::Close => false,
        }
    }

    fn expiration(&self, credential: &[u8]) -> DateTime<Utc> {
        self.store.expire_time(credential)
    }
}
