pub mod user;

pub use user::{StaffUser, UserContext};
