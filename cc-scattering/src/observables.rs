pub mod outcome;
pub mod s_matrix;
