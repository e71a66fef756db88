//! Messenger capability and chat-platform config/credential glue.
//! Concrete chat-platform API clients stay out of the core; this
//! crate is where the `Messenger` seam and its one concrete (Feishu)
//! implementation live.

pub mod config;
pub mod feishu;
pub mod messenger;

pub use config::{load_config, save_config, AppConfig, ChannelsConfig, FeishuChannelConfig};
pub use feishu::{parse_requirement_event, FeishuAppCredentials, FeishuMessenger, FeishuRequirement};
pub use messenger::{Messenger, NullMessenger};
