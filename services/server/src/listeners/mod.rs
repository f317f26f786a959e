//! Accept loops for the two subscriber transports (spec §4.9). Exactly one
//! of these runs per process, selected by `config.protocol`; the admin HTTP
//! listener in [`crate::http`] always runs on its own bind address.

pub mod tcp;
pub mod ws;
