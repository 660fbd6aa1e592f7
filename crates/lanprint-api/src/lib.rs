// lanprint-api: LAN transports for 3D printers (MQTT message bus, FTPS file channel, SSDP)

pub mod command;
pub mod discovery;
pub mod error;
pub mod ftps;
pub mod link;
pub mod mqtt;
pub mod tls;

pub use command::{PrintOptions, ProjectFileCommand};
pub use discovery::{ArrivalNotice, PrinterInfo};
pub use error::Error;
pub use ftps::FtpsUploader;
pub use link::{
    Channel, ChannelPeer, Connector, Endpoint, LinkEvent, Outbound, ProgressFn, QualityOfService,
    TransferProgress, TransportSecurity, Uploader,
};
pub use mqtt::MqttConnector;
pub use tls::TlsMode;
