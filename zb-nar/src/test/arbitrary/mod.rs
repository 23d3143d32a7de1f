pub mod archive;

// Re-export commonly needed test utilities from zb-test-utils
pub use zb_test_utils::{
    arb_byte_string, arb_duration, arb_file_component, arb_filename, arb_path, arb_system_time,
};
