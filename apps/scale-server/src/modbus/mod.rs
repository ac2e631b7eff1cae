pub mod connection;
pub mod decode;

pub use connection::{
    Connector, DeviceConnection, DeviceError, RegisterLink, SharedDevice, TcpConnector,
};
pub use decode::{decode_i32, ByteOrder, WordOrder};

/// Two consecutive holding registers returned by one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRegisterPair {
    pub r0: u16,
    pub r1: u16,
}

impl RawRegisterPair {
    pub fn decode(self, byte_order: ByteOrder, word_order: WordOrder) -> i32 {
        decode_i32(self.r0, self.r1, byte_order, word_order)
    }

    pub fn to_vec(self) -> Vec<u16> {
        vec![self.r0, self.r1]
    }
}
