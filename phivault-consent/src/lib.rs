//! Consent ledger for phivault.
//!
//! Consent definitions are versioned documents that patients or
//! practitioners accept. Each definition has at most one ACTIVE version;
//! publishing a new one archives its predecessor in the same transaction.
//! Acceptances are recorded per version and are idempotent.
//!
//! The ledger keeps its tables in whichever database the session's
//! current tenant context selects, so every clinic keeps its own consent
//! history. Register [`initialize_consent_schema`] with the router:
//!
//! ```ignore
//! let router = TenantRouter::open_with_schemas(config, kms, vec![initialize_consent_schema])?;
//! ```

mod error;
mod ledger;
mod schema;
mod types;

pub use error::{ConsentError, ConsentResult};
pub use ledger::ConsentLedger;
pub use schema::initialize_consent_schema;
pub use types::{
    ConsentDefinition, ConsentSubject, ConsentVersion, EntityConsentAcceptance, TriggerPoint,
    VersionStatus,
};
