pub mod action_items;
pub mod agents;
pub mod api_router;
pub mod assessments;
pub mod audit;
pub mod core;
pub mod directory;
pub mod form_layouts;
pub mod messages;
pub mod outbox;
pub mod tickets;
pub mod vendors;
