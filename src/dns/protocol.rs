//! Implements the DNS protocol in a transport agnostic fashion

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use derive_more::{Display, Error, From};
use serde_derive::{Deserialize, Serialize};

use crate::dns::buffer::{PacketBuffer, VectorPacketBuffer};

#[derive(Debug, Display, From, Error)]
pub enum ProtocolError {
    Buffer(crate::dns::buffer::BufferError),
    #[display(fmt = "resource record data exceeds the wire length field")]
    MalformedRecord,
}

type Result<T> = std::result::Result<T, ProtocolError>;

/// The INTERNET class, the only one seen in practice
pub const CLASS_IN: u16 = 1;

/// Bit masks for the sub-fields of the header flags word
pub mod flags {
    pub const QR: u16 = 0x8000;
    pub const OPCODE: u16 = 0x7800;
    pub const AA: u16 = 0x0400;
    pub const TC: u16 = 0x0200;
    pub const RD: u16 = 0x0100;
    pub const RA: u16 = 0x0080;
    pub const Z: u16 = 0x0070;
    pub const RCODE: u16 = 0x000F;
}

/// `QueryType` represents the requested Record Type of a query
///
/// The specific type Unknown takes an integer parameter in order to retain
/// the id of an unknown record type when re-encoding a message. An integer
/// can be converted to a querytype using the `from_num` function, and back
/// to an integer using the `to_num` method.
#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy, Serialize, Deserialize)]
pub enum QueryType {
    Unknown(u16),
    A,     // 1
    Ns,    // 2
    Cname, // 5
    Soa,   // 6
    Ptr,   // 12
    Mx,    // 15
    Txt,   // 16
    Aaaa,  // 28
    Srv,   // 33
    Any,   // 255
}

impl QueryType {
    pub fn to_num(&self) -> u16 {
        match *self {
            QueryType::Unknown(x) => x,
            QueryType::A => 1,
            QueryType::Ns => 2,
            QueryType::Cname => 5,
            QueryType::Soa => 6,
            QueryType::Ptr => 12,
            QueryType::Mx => 15,
            QueryType::Txt => 16,
            QueryType::Aaaa => 28,
            QueryType::Srv => 33,
            QueryType::Any => 255,
        }
    }

    pub fn from_num(num: u16) -> QueryType {
        match num {
            1 => QueryType::A,
            2 => QueryType::Ns,
            5 => QueryType::Cname,
            6 => QueryType::Soa,
            12 => QueryType::Ptr,
            15 => QueryType::Mx,
            16 => QueryType::Txt,
            28 => QueryType::Aaaa,
            33 => QueryType::Srv,
            255 => QueryType::Any,
            _ => QueryType::Unknown(num),
        }
    }
}

/// The result code of a DNS response
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ResultCode {
    #[default]
    NOERROR = 0,
    FORMERR = 1,
    SERVFAIL = 2,
    NXDOMAIN = 3,
    NOTIMP = 4,
    REFUSED = 5,
}

impl ResultCode {
    pub fn from_num(num: u8) -> ResultCode {
        match num {
            1 => ResultCode::FORMERR,
            2 => ResultCode::SERVFAIL,
            3 => ResultCode::NXDOMAIN,
            4 => ResultCode::NOTIMP,
            5 => ResultCode::REFUSED,
            _ => ResultCode::NOERROR,
        }
    }
}

/// Representation of a DNS header
///
/// The flags word is kept in its wire form; the accessor methods expose the
/// named sub-fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: u16,

    pub questions: u16,
    pub answers: u16,
    pub authoritative_entries: u16,
    pub resource_entries: u16,
}

impl DnsHeader {
    pub fn new() -> DnsHeader {
        DnsHeader::default()
    }

    pub fn binary_len(&self) -> usize {
        12
    }

    pub fn is_response(&self) -> bool {
        self.flags & flags::QR != 0
    }

    pub fn opcode(&self) -> u8 {
        ((self.flags & flags::OPCODE) >> 11) as u8
    }

    pub fn authoritative_answer(&self) -> bool {
        self.flags & flags::AA != 0
    }

    pub fn truncated_message(&self) -> bool {
        self.flags & flags::TC != 0
    }

    pub fn recursion_desired(&self) -> bool {
        self.flags & flags::RD != 0
    }

    pub fn recursion_available(&self) -> bool {
        self.flags & flags::RA != 0
    }

    pub fn z(&self) -> u8 {
        ((self.flags & flags::Z) >> 4) as u8
    }

    pub fn rescode(&self) -> ResultCode {
        ResultCode::from_num((self.flags & flags::RCODE) as u8)
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        self.id = buffer.read_u16()?;
        self.flags = buffer.read_u16()?;

        self.questions = buffer.read_u16()?;
        self.answers = buffer.read_u16()?;
        self.authoritative_entries = buffer.read_u16()?;
        self.resource_entries = buffer.read_u16()?;

        Ok(())
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_u16(self.id)?;
        buffer.write_u16(self.flags)?;

        buffer.write_u16(self.questions)?;
        buffer.write_u16(self.answers)?;
        buffer.write_u16(self.authoritative_entries)?;
        buffer.write_u16(self.resource_entries)?;

        Ok(())
    }
}

impl fmt::Display for DnsHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DnsHeader:")?;
        writeln!(f, "\tid: {0}", self.id)?;

        writeln!(f, "\tresponse: {0}", self.is_response())?;
        writeln!(f, "\topcode: {0}", self.opcode())?;
        writeln!(f, "\tauthoritative_answer: {0}", self.authoritative_answer())?;
        writeln!(f, "\ttruncated_message: {0}", self.truncated_message())?;
        writeln!(f, "\trecursion_desired: {0}", self.recursion_desired())?;
        writeln!(f, "\trecursion_available: {0}", self.recursion_available())?;
        writeln!(f, "\trescode: {:?}", self.rescode())?;

        writeln!(f, "\tquestions: {0}", self.questions)?;
        writeln!(f, "\tanswers: {0}", self.answers)?;
        writeln!(f, "\tauthoritative_entries: {0}", self.authoritative_entries)?;
        writeln!(f, "\tresource_entries: {0}", self.resource_entries)?;

        Ok(())
    }
}

/// Representation of a DNS question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: QueryType,
    pub qclass: u16,
}

impl DnsQuestion {
    pub fn new(name: String, qtype: QueryType) -> DnsQuestion {
        DnsQuestion {
            name,
            qtype,
            qclass: CLASS_IN,
        }
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        buffer.read_qname(&mut self.name)?;
        self.qtype = QueryType::from_num(buffer.read_u16()?);
        self.qclass = buffer.read_u16()?;

        Ok(())
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_qname(&self.name)?;
        buffer.write_u16(self.qtype.to_num())?;
        buffer.write_u16(self.qclass)?;

        Ok(())
    }
}

impl fmt::Display for DnsQuestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DnsQuestion:")?;
        writeln!(f, "\tname: {0}", self.name)?;
        writeln!(f, "\trecord type: {:?}", self.qtype)?;

        Ok(())
    }
}

/// Representation of a DNS resource record
///
/// The record payload is kept as opaque bytes; its interpretation depends
/// on the record type and is left to the caller. The wire rdlength is not
/// stored separately, it always equals the payload length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsResourceRecord {
    pub name: String,
    pub rtype: QueryType,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl DnsResourceRecord {
    pub fn read<T: PacketBuffer>(buffer: &mut T) -> Result<DnsResourceRecord> {
        let mut name = String::new();
        buffer.read_qname(&mut name)?;

        let rtype = QueryType::from_num(buffer.read_u16()?);
        let class = buffer.read_u16()?;
        let ttl = buffer.read_u32()?;
        let data_len = buffer.read_u16()?;

        let cur_pos = buffer.pos();
        let rdata = buffer.get_range(cur_pos, data_len as usize)?.to_vec();
        buffer.step(data_len as usize)?;

        Ok(DnsResourceRecord {
            name,
            rtype,
            class,
            ttl,
            rdata,
        })
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<usize> {
        if self.rdata.len() > u16::MAX as usize {
            return Err(ProtocolError::MalformedRecord);
        }

        let start_pos = buffer.pos();

        buffer.write_qname(&self.name)?;
        buffer.write_u16(self.rtype.to_num())?;
        buffer.write_u16(self.class)?;
        buffer.write_u32(self.ttl)?;
        buffer.write_u16(self.rdata.len() as u16)?;

        for b in &self.rdata {
            buffer.write_u8(*b)?;
        }

        Ok(buffer.pos() - start_pos)
    }

    pub fn rdlength(&self) -> u16 {
        self.rdata.len() as u16
    }

    /// The record payload as an IPv4 address, for A records
    pub fn ipv4_addr(&self) -> Option<Ipv4Addr> {
        match (self.rtype, self.rdata.as_slice()) {
            (QueryType::A, &[a, b, c, d]) => Some(Ipv4Addr::new(a, b, c, d)),
            _ => None,
        }
    }

    /// The record payload as an IPv6 address, for AAAA records
    pub fn ipv6_addr(&self) -> Option<Ipv6Addr> {
        if self.rtype != QueryType::Aaaa || self.rdata.len() != 16 {
            return None;
        }

        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.rdata);

        Some(Ipv6Addr::from(octets))
    }
}

/// Representation of a complete DNS message
///
/// A message can be decoded from and re-encoded to its wire form in a
/// single operation. After a successful decode, each section holds exactly
/// as many entries as the corresponding header count announced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsMessage {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsResourceRecord>,
    pub authorities: Vec<DnsResourceRecord>,
    pub additionals: Vec<DnsResourceRecord>,
}

impl DnsMessage {
    pub fn new() -> DnsMessage {
        DnsMessage::default()
    }

    /// Decode a single message from a raw payload
    ///
    /// Bytes past the last announced record are tolerated; some transports
    /// pad their payloads.
    pub fn from_bytes(data: &[u8]) -> Result<DnsMessage> {
        let mut buffer = VectorPacketBuffer::from_bytes(data);

        DnsMessage::from_buffer(&mut buffer)
    }

    pub fn from_buffer<T: PacketBuffer>(buffer: &mut T) -> Result<DnsMessage> {
        let mut result = DnsMessage::new();
        result.header.read(buffer)?;

        for _ in 0..result.header.questions {
            let mut question = DnsQuestion::new(String::new(), QueryType::Unknown(0));
            question.read(buffer)?;
            result.questions.push(question);
        }

        for _ in 0..result.header.answers {
            let rec = DnsResourceRecord::read(buffer)?;
            result.answers.push(rec);
        }
        for _ in 0..result.header.authoritative_entries {
            let rec = DnsResourceRecord::read(buffer)?;
            result.authorities.push(rec);
        }
        for _ in 0..result.header.resource_entries {
            let rec = DnsResourceRecord::read(buffer)?;
            result.additionals.push(rec);
        }

        Ok(result)
    }

    /// Encode the message, with name compression disabled
    pub fn write<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        self.header.questions = self.questions.len() as u16;
        self.header.answers = self.answers.len() as u16;
        self.header.authoritative_entries = self.authorities.len() as u16;
        self.header.resource_entries = self.additionals.len() as u16;

        self.header.write(buffer)?;

        for question in &self.questions {
            question.write(buffer)?;
        }

        for rec in self
            .answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.additionals.iter())
        {
            rec.write(buffer)?;
        }

        Ok(())
    }

    /// The first A record in the answer section, if any
    pub fn get_first_a(&self) -> Option<String> {
        self.answers
            .iter()
            .filter_map(|rec| rec.ipv4_addr())
            .next()
            .map(|addr| addr.to_string())
    }
}
