//! Generated protobuf and gRPC code for the Meridian timestamp oracle.

pub mod meridian {
    pub mod v1 {
        tonic::include_proto!("meridian.v1");
    }
}
