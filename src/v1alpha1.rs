//! Wire types and gRPC stubs for the `v1alpha1.CSIDriverProvider` service.
//!
//! These mirror what `tonic-build` would emit for the provider protocol,
//! checked in so building the crate does not need `protoc`. The one
//! hand-written piece is the [`MountResponse`] codec, which tracks whether
//! any object versions were present on the wire.

use prost::bytes::{Buf, BufMut};
use prost::encoding::{self, DecodeContext, WireType};
use prost::DecodeError;

/// Fully qualified gRPC service name.
pub const SERVICE_NAME: &str = "v1alpha1.CSIDriverProvider";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VersionRequest {
    /// Version of the API the driver speaks.
    #[prost(string, tag = "1")]
    pub version: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VersionResponse {
    #[prost(string, tag = "1")]
    pub version: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub runtime_name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub runtime_version: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MountRequest {
    /// Serialized volume attributes.
    #[prost(string, tag = "1")]
    pub attributes: ::prost::alloc::string::String,
    /// Serialized node publish secrets.
    #[prost(string, tag = "2")]
    pub secrets: ::prost::alloc::string::String,
    /// Absolute path the volume is published at.
    #[prost(string, tag = "3")]
    pub target_path: ::prost::alloc::string::String,
    /// Desired file mode, as a decimal string.
    #[prost(string, tag = "4")]
    pub permission: ::prost::alloc::string::String,
    /// Object versions recorded by the previous mount of this volume.
    #[prost(message, repeated, tag = "5")]
    pub current_object_version: ::prost::alloc::vec::Vec<ObjectVersion>,
}

#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct ObjectVersion {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub version: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct File {
    /// Path relative to the mount target.
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
    /// POSIX permission bits; 0 means "use the default".
    #[prost(int32, tag = "2")]
    pub mode: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub contents: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Error {
    #[prost(string, tag = "1")]
    pub code: ::prost::alloc::string::String,
}

/// Response to a `Mount` call.
///
/// `object_version` is `None` when the field never appeared in the encoded
/// message. Proto3 cannot encode an empty repeated field, so over the wire a
/// provider that reports no objects is indistinguishable from one that
/// omitted the field; in-process callers can still build `Some(vec![])`.
#[derive(Clone, PartialEq, Default, Debug)]
pub struct MountResponse {
    pub object_version: Option<Vec<ObjectVersion>>,
    pub error: Option<Error>,
    pub files: Vec<File>,
}

impl MountResponse {
    /// Non-empty provider error code, if the provider reported one.
    pub fn error_code(&self) -> Option<&str> {
        self.error
            .as_ref()
            .map(|e| e.code.as_str())
            .filter(|code| !code.is_empty())
    }
}

impl ::prost::Message for MountResponse {
    fn encode_raw(&self, buf: &mut impl BufMut)
    where
        Self: Sized,
    {
        if let Some(versions) = &self.object_version {
            for version in versions {
                encoding::message::encode(1, version, buf);
            }
        }
        if let Some(error) = &self.error {
            encoding::message::encode(2, error, buf);
        }
        for file in &self.files {
            encoding::message::encode(3, file, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: WireType,
        buf: &mut impl Buf,
        ctx: DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => encoding::message::merge_repeated(
                wire_type,
                self.object_version.get_or_insert_with(Vec::new),
                buf,
                ctx,
            )
            .map_err(|mut e| {
                e.push("MountResponse", "object_version");
                e
            }),
            2 => encoding::message::merge(
                wire_type,
                self.error.get_or_insert_with(Error::default),
                buf,
                ctx,
            )
            .map_err(|mut e| {
                e.push("MountResponse", "error");
                e
            }),
            3 => encoding::message::merge_repeated(wire_type, &mut self.files, buf, ctx).map_err(
                |mut e| {
                    e.push("MountResponse", "files");
                    e
                },
            ),
            _ => encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        self.object_version
            .as_ref()
            .map_or(0, |v| encoding::message::encoded_len_repeated(1, v))
            + self
                .error
                .as_ref()
                .map_or(0, |e| encoding::message::encoded_len(2, e))
            + encoding::message::encoded_len_repeated(3, &self.files)
    }

    fn clear(&mut self) {
        self.object_version = None;
        self.error = None;
        self.files.clear();
    }
}

/// Generated client implementations.
pub mod csi_driver_provider_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::let_unit_value)]
    use tonic::codegen::http::Uri;
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct CsiDriverProviderClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl<T> CsiDriverProviderClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::Body>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }

        /// Limits the maximum size of a decoded message.
        #[must_use]
        pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
            self.inner = self.inner.max_decoding_message_size(limit);
            self
        }

        pub async fn version(
            &mut self,
            request: impl tonic::IntoRequest<super::VersionRequest>,
        ) -> std::result::Result<tonic::Response<super::VersionResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/v1alpha1.CSIDriverProvider/Version");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("v1alpha1.CSIDriverProvider", "Version"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn mount(
            &mut self,
            request: impl tonic::IntoRequest<super::MountRequest>,
        ) -> std::result::Result<tonic::Response<super::MountResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/v1alpha1.CSIDriverProvider/Mount");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("v1alpha1.CSIDriverProvider", "Mount"));
            self.inner.unary(req, path, codec).await
        }
    }
}

/// Generated server implementations.
pub mod csi_driver_provider_server {
    #![allow(unused_variables, dead_code, missing_docs, clippy::let_unit_value)]
    use tonic::codegen::*;

    /// Server-side contract a provider plugin implements.
    #[async_trait::async_trait]
    pub trait CsiDriverProvider: std::marker::Send + std::marker::Sync + 'static {
        async fn version(
            &self,
            request: tonic::Request<super::VersionRequest>,
        ) -> std::result::Result<tonic::Response<super::VersionResponse>, tonic::Status>;

        async fn mount(
            &self,
            request: tonic::Request<super::MountRequest>,
        ) -> std::result::Result<tonic::Response<super::MountResponse>, tonic::Status>;
    }

    #[derive(Debug)]
    pub struct CsiDriverProviderServer<T> {
        inner: Arc<T>,
    }

    impl<T> CsiDriverProviderServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T, B> tonic::codegen::Service<http::Request<B>> for CsiDriverProviderServer<T>
    where
        T: CsiDriverProvider,
        B: Body + std::marker::Send + 'static,
        B::Error: Into<StdError> + std::marker::Send + 'static,
    {
        type Response = http::Response<tonic::body::Body>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(
            &mut self,
            _cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            match req.uri().path() {
                "/v1alpha1.CSIDriverProvider/Version" => {
                    #[allow(non_camel_case_types)]
                    struct VersionSvc<T: CsiDriverProvider>(pub Arc<T>);
                    impl<T: CsiDriverProvider> tonic::server::UnaryService<super::VersionRequest>
                        for VersionSvc<T>
                    {
                        type Response = super::VersionResponse;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::VersionRequest>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut = async move {
                                <T as CsiDriverProvider>::version(&inner, request).await
                            };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let method = VersionSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec);
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/v1alpha1.CSIDriverProvider/Mount" => {
                    #[allow(non_camel_case_types)]
                    struct MountSvc<T: CsiDriverProvider>(pub Arc<T>);
                    impl<T: CsiDriverProvider> tonic::server::UnaryService<super::MountRequest>
                        for MountSvc<T>
                    {
                        type Response = super::MountResponse;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::MountRequest>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut = async move {
                                <T as CsiDriverProvider>::mount(&inner, request).await
                            };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let method = MountSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec);
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    Ok(tonic::Status::unimplemented("unknown method").into_http())
                }),
            }
        }
    }

    impl<T> Clone for CsiDriverProviderServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }

    impl<T> tonic::server::NamedService for CsiDriverProviderServer<T> {
        const NAME: &'static str = super::SERVICE_NAME;
    }
}
