pub(crate) mod chunk;
pub mod tcc_feedback;
