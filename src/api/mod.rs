pub mod announcement;
pub mod fee_outline;
pub mod message;
pub mod salary;
pub mod school_class;
