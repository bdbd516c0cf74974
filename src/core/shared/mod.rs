pub mod enums;
pub mod error;
pub mod models;
pub mod schema;
pub mod state;
#[cfg(test)]
pub mod test_utils;
pub mod utils;

pub use enums::*;
pub use error::{GovError, GovResult};
pub use models::{DbTenant, DbUser};
pub use state::AppState;
pub use utils::{create_conn, run_migrations, DbPool};
