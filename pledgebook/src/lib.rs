pub mod member;
pub mod wire;
pub mod gateway;
pub mod store;
pub mod import;
pub mod stats;
pub mod access;
pub mod assistant;
pub mod config;
pub mod seed;
pub mod error;

pub use error::{PledgeError, Result};
pub use member::{Frequency, Member, MemberFields, MemberId, Payment};
pub use gateway::{ChangeEvent, ConfigSource, Gateway, MemoryGateway, SqliteGateway};
pub use store::{LoadStatus, Notice, Store};
pub use import::{ImportOutcome, ImportReport, ImportSession, Resolution};
pub use config::Config;
