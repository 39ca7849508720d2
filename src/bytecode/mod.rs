pub mod iseq;
pub mod op_code;
