//! Generated gRPC/protobuf code for the bespoke query and ingest wire
//! contracts, compiled from `proto/query.proto` by `build.rs`.

#![allow(missing_docs)]
#![allow(clippy::all)]

tonic::include_proto!("tailsample.query.v1");
