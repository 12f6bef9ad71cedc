//! Domain layer: catalog model, change records, priority table, alert
//! rules, notifications and broker event payloads.

pub mod alert;
pub mod change;
pub mod events;
pub mod item;
pub mod notification;
pub mod priority;

pub use alert::{AlertBook, AlertRule, NewAlertRule};
pub use change::{NewPriceChange, NewStockChange, PriceChangeRecord, StockChangeRecord};
pub use events::{ItemChanged, NotifyUser, PriorityUpdate};
pub use item::{
    Category, Favorite, Item, ItemSnapshot, ItemUpsert, Variant, VariantSnapshot, VariantUpsert,
};
pub use notification::{NewNotification, NotificationRecord};
pub use priority::{Cohort, PriorityTable};
