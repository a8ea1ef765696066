//! Fixed texts returned to the API server by the admission webhook.
//!
//! Binding errors render through [`crate::binding::BindingError`].

/// Denial while a legacy `OneAgentAPM` object is present in the cluster
pub const LEGACY_OBJECT_PRESENT: &str = "legacy OneAgentAPM object detected - injection is blocked until the legacy agent operator has been uninstalled";

pub const FAILED_TO_QUERY_LEGACY_OBJECTS: &str = "failed to query legacy OneAgentAPM objects";

pub const FAILED_TO_DECODE_POD: &str = "failed to decode pod";

pub const APP_INJECTION_DISABLED: &str = "app injection is disabled";

pub const POD_OPTED_OUT: &str = "pod opted out of injection";

pub const POD_ALREADY_INJECTED: &str = "pod is already injected";

pub const NOT_A_CREATE: &str = "only pod creation is mutated";

pub const FAILED_TO_QUERY_INIT_SECRET: &str =
    "failed to query the init secret before pod injection";

pub const FAILED_TO_CREATE_INIT_SECRET: &str =
    "failed to create the init secret before pod injection";

pub const FAILED_TO_QUERY_DATA_INGEST_SECRET: &str =
    "failed to query the data-ingest endpoint secret before pod injection";

pub const FAILED_TO_CREATE_DATA_INGEST_SECRET: &str =
    "failed to create the data-ingest endpoint secret before pod injection";

pub const ADMISSION_TIMED_OUT: &str = "admission decision exceeded its deadline";

pub const FAILED_TO_SERIALIZE_PATCH: &str = "failed to serialize the injection patch";
