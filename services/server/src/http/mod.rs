//! Admin HTTP handlers (spec §4.6, §4.8, §6): `/pub`, `/ch`, `/stat`. These
//! all live on `admin_addr`, never on the public subscriber bind — see
//! `build_admin_router` in `crate::lib` for the split.

pub mod ch;
pub mod publish;
pub mod stats;
