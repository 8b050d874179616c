use std::fmt::{Display, Formatter};

use russh::{ChannelId, Pty};

#[derive(Clone, Debug)]
pub struct PtyRequest {
    pub term: String,
    pub col_width: u32,
    pub row_height: u32,
    pub pix_width: u32,
    pub pix_height: u32,
    pub modes: Vec<(Pty, u32)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ServerChannelId(pub ChannelId);

impl Display for ServerChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct DirectTcpIpParams {
    pub host_to_connect: String,
    pub port_to_connect: u32,
    pub originator_address: String,
    pub originator_port: u32,
}

impl DirectTcpIpParams {
    pub fn target(&self) -> String {
        format!("{}:{}", self.host_to_connect, self.port_to_connect)
    }

    pub fn originator(&self) -> String {
        format!("{}:{}", self.originator_address, self.originator_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_tcpip_params_format_host_port_pairs() {
        let params = DirectTcpIpParams {
            host_to_connect: "10.0.0.5".into(),
            port_to_connect: 5432,
            originator_address: "192.168.1.9".into(),
            originator_port: 53211,
        };
        assert_eq!(params.target(), "10.0.0.5:5432");
        assert_eq!(params.originator(), "192.168.1.9:53211");
    }
}
