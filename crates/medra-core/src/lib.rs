// Medra Core
// Shared services for the code-healing platform: error taxonomy, settings,
// logging, cancellation, bounded retry.

pub mod cancel;
pub mod error;
pub mod logging;
pub mod retry;
pub mod settings;

pub use cancel::CancelToken;
pub use error::{ErrorClass, MedraError, Result};
pub use settings::Settings;
