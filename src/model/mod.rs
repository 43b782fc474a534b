pub mod announcement;
pub mod fee_outline;
pub mod message;
pub mod role;
pub mod salary;
pub mod school_class;
pub mod user;
