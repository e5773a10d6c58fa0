pub mod scs;
pub mod scs_mock;
