mod layout;
mod record;
mod store;

pub use layout::{default_user_prefix, StoreLayout};
pub use record::{parse_record, render_record};
pub use store::LocalExtensionStore;
