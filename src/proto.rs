//! Re-exported protobuf code.

pub use meridian_proto::meridian;
