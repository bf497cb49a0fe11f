pub mod object_file;

pub use object_file::ObjectFile;
