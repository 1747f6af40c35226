pub(crate) mod opts;
pub(crate) mod policy;
pub(crate) mod state_machine;
