//! Backend wire model and gRPC client.
//!
//! Only the subset of the monitoring API that the pipeline invokes is
//! modelled: one unary `CreateTimeSeries` call and its message types. The
//! [`MetricBackend`] trait is the seam between the drain loop and the wire;
//! production injects [`GrpcBackend`], tests inject a recording fake.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig};

use crate::config::ExporterOpts;
use crate::{Error, Result};

/// Production endpoint for the monitoring API.
const MONITORING_ENDPOINT: &str = "https://monitoring.googleapis.com";

/// Full method path of the one RPC the pipeline issues.
const CREATE_TIME_SERIES_PATH: &str = "/google.monitoring.v3.MetricService/CreateTimeSeries";

/// Protobuf timestamp.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

impl Timestamp {
    /// Convert a millisecond Unix timestamp into seconds/nanos form.
    pub fn from_millis(ms: i64) -> Self {
        Self {
            seconds: ms.div_euclid(1000),
            nanos: (ms.rem_euclid(1000) * 1_000_000) as i32,
        }
    }
}

/// The time window a point applies to. Gauge points carry only an end time;
/// cumulative points carry the reset time as start and must satisfy
/// `end > start`.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct TimeInterval {
    #[prost(message, optional, tag = "1")]
    pub end_time: Option<Timestamp>,
    #[prost(message, optional, tag = "2")]
    pub start_time: Option<Timestamp>,
}

/// A single measured value.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TypedValue {
    #[prost(oneof = "typed_value::Value", tags = "1, 2, 3, 5")]
    pub value: Option<typed_value::Value>,
}

pub mod typed_value {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(bool, tag = "1")]
        BoolValue(bool),
        #[prost(int64, tag = "2")]
        Int64Value(i64),
        #[prost(double, tag = "3")]
        DoubleValue(f64),
        #[prost(message, tag = "5")]
        DistributionValue(super::Distribution),
    }
}

impl TypedValue {
    pub fn double(value: f64) -> Self {
        Self {
            value: Some(typed_value::Value::DoubleValue(value)),
        }
    }

    pub fn distribution(value: Distribution) -> Self {
        Self {
            value: Some(typed_value::Value::DistributionValue(value)),
        }
    }
}

/// Histogram-shaped value: a count, a mean, and per-bucket counts over
/// explicit bounds. Bounds exclude the overflow bucket, so `bucket_counts`
/// has one more entry than `bounds`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Distribution {
    #[prost(int64, tag = "1")]
    pub count: i64,
    #[prost(double, tag = "2")]
    pub mean: f64,
    #[prost(double, tag = "3")]
    pub sum_of_squared_deviation: f64,
    #[prost(message, optional, tag = "6")]
    pub bucket_options: Option<BucketOptions>,
    #[prost(int64, repeated, tag = "7")]
    pub bucket_counts: Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BucketOptions {
    #[prost(message, optional, tag = "3")]
    pub explicit_buckets: Option<ExplicitBuckets>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExplicitBuckets {
    #[prost(double, repeated, tag = "1")]
    pub bounds: Vec<f64>,
}

/// One data point of a time series.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Point {
    #[prost(message, optional, tag = "1")]
    pub interval: Option<TimeInterval>,
    #[prost(message, optional, tag = "2")]
    pub value: Option<TypedValue>,
}

/// Metric descriptor reference: the metric type URL plus its labels.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Metric {
    #[prost(map = "string, string", tag = "2")]
    pub labels: HashMap<String, String>,
    #[prost(string, tag = "3")]
    pub r#type: String,
}

/// The monitored resource a series is written against.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MonitoredResource {
    #[prost(string, tag = "1")]
    pub r#type: String,
    #[prost(map = "string, string", tag = "2")]
    pub labels: HashMap<String, String>,
}

/// How a metric's values relate over time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MetricKind {
    Unspecified = 0,
    Gauge = 1,
    Delta = 2,
    Cumulative = 3,
}

/// The value type of a metric's points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ValueType {
    Unspecified = 0,
    Bool = 1,
    Int64 = 2,
    Double = 3,
    Distribution = 5,
}

/// A time series carrying exactly one point per write, as the batch
/// contract requires.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimeSeries {
    #[prost(message, optional, tag = "1")]
    pub metric: Option<Metric>,
    #[prost(message, optional, tag = "2")]
    pub resource: Option<MonitoredResource>,
    #[prost(enumeration = "MetricKind", tag = "3")]
    pub metric_kind: i32,
    #[prost(enumeration = "ValueType", tag = "4")]
    pub value_type: i32,
    #[prost(message, repeated, tag = "5")]
    pub points: Vec<Point>,
}

/// Request for one batched write. `name` is `projects/<project_id>`;
/// `time_series` holds at most 200 entries, no two sharing a series.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateTimeSeriesRequest {
    #[prost(message, repeated, tag = "2")]
    pub time_series: Vec<TimeSeries>,
    #[prost(string, tag = "3")]
    pub name: String,
}

/// Empty response message of `CreateTimeSeries`.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Empty {}

/// Backend interface
///
/// This trait abstracts the remote monitoring backend, allowing a tonic
/// client in production and a recording fake in tests.
#[async_trait]
pub trait MetricBackend: Send + Sync {
    /// Write one batch of time series.
    async fn create_time_series(&self, req: CreateTimeSeriesRequest) -> Result<()>;
}

/// Tonic-based [`MetricBackend`] implementation.
#[derive(Clone)]
pub struct GrpcBackend {
    channel: Channel,
    authorization: Option<MetadataValue<Ascii>>,
}

impl GrpcBackend {
    /// Build a backend client from exporter options.
    ///
    /// The connection is established lazily on the first write. A configured
    /// `test_endpoint` switches to plaintext and drops authentication;
    /// otherwise the production endpoint is used over TLS. A configured
    /// `credentials_file` is read once and attached as a bearer token —
    /// minting and refreshing credentials belongs to the host.
    pub fn connect(opts: &ExporterOpts) -> Result<Self> {
        let endpoint = match &opts.test_endpoint {
            Some(ep) => {
                let uri = if ep.contains("://") {
                    ep.clone()
                } else {
                    format!("http://{ep}")
                };
                Channel::from_shared(uri)
                    .map_err(|e| Error::Config(format!("invalid test endpoint: {e}")))?
            }
            None => Channel::from_static(MONITORING_ENDPOINT)
                .tls_config(ClientTlsConfig::new().with_native_roots())?,
        };

        let authorization = match (&opts.test_endpoint, &opts.credentials_file) {
            (None, Some(path)) => {
                let token = std::fs::read_to_string(path)?;
                let value = format!("Bearer {}", token.trim());
                Some(value.parse().map_err(|e| {
                    Error::Config(format!("invalid credentials in {}: {e}", path.display()))
                })?)
            }
            _ => None,
        };

        Ok(Self {
            channel: endpoint.connect_lazy(),
            authorization,
        })
    }
}

#[async_trait]
impl MetricBackend for GrpcBackend {
    async fn create_time_series(&self, req: CreateTimeSeriesRequest) -> Result<()> {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready().await?;

        let mut request = tonic::Request::new(req);
        if let Some(auth) = &self.authorization {
            request.metadata_mut().insert("authorization", auth.clone());
        }

        let codec: tonic::codec::ProstCodec<CreateTimeSeriesRequest, Empty> =
            tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(CREATE_TIME_SERIES_PATH);
        let _response: tonic::Response<Empty> = grpc.unary(request, path, codec).await?;
        Ok(())
    }
}

/// Shared handle used throughout the pipeline.
pub type BackendHandle = Arc<dyn MetricBackend>;
