pub mod action_reader;
pub mod refund_writer;
