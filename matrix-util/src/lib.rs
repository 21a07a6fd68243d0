pub mod common_io;
pub mod knn_match;
pub mod tensor_io;
pub mod traits;
