//! Authorization engine.
//!
//! Every permission decision in the API goes through this module: a pure
//! function over the acting user, their relation to the target project, and
//! the action's inputs. Handlers load state first (missing records 404 before
//! any check runs), then ask `policy`, then touch the database.

mod actor;
pub mod policy;

pub use actor::{Actor, ProjectRelation};
