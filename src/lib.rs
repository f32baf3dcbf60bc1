pub mod bake;
pub mod composer;
pub mod composition;
pub mod diagnostics;
pub mod dsl;
pub mod library;
pub mod protocol;
pub mod watch;
pub mod ws;
