// Network layer: REST transport adapter and the realtime push channel.

pub mod realtime;
pub mod transport;

pub use realtime::{ChannelCommand, ChannelEvent, ChannelHandle, RealtimeChannel, RealtimeConnector, WsConnector};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, ReqwestTransport};
