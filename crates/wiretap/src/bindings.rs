use wiretap_protocol_core::AdapterBinding;
use wiretap_protocol_v1_15::V1_15Adapter;
use wiretap_protocol_v1_19::V1_19Adapter;

/// Every release this build can intercept. Supporting a new release means adding its
/// adapter crate and one entry here.
pub fn default_bindings() -> Vec<AdapterBinding> {
    vec![V1_15Adapter::binding(), V1_19Adapter::binding()]
}
