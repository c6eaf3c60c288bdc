pub mod accounts;
pub mod sticky_bindings;
pub mod usage_entries;

pub use accounts::Entity as Accounts;
pub use sticky_bindings::Entity as StickyBindings;
pub use usage_entries::Entity as UsageEntries;
