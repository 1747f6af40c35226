pub(crate) mod handle;
pub(crate) mod protocol;
pub(crate) mod spawner;
pub(crate) mod thread;
