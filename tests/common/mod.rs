//! In-process Modbus TCP slave for integration tests
//!
//! Binds `127.0.0.1:0`, serves every accepted connection on its own thread
//! and keeps a shared register and coil bank so that writes are visible to
//! later reads.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

const BANK_SIZE: usize = 512;

/// How the slave treats incoming requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Answer every request
    Normal,
    /// Read requests but never answer
    Silent,
    /// Drop the first connection after reading its first request
    DropFirstConnection,
}

pub struct Bank {
    pub coils: Vec<bool>,
    pub discrete_inputs: Vec<bool>,
    pub holding_registers: Vec<u16>,
    pub input_registers: Vec<u16>,
}

impl Default for Bank {
    fn default() -> Self {
        Self {
            coils: vec![false; BANK_SIZE],
            discrete_inputs: vec![false; BANK_SIZE],
            holding_registers: vec![0; BANK_SIZE],
            input_registers: vec![0; BANK_SIZE],
        }
    }
}

pub struct TestSlave {
    addr: SocketAddr,
    bank: Arc<Mutex<Bank>>,
    connections: Arc<AtomicUsize>,
}

impl TestSlave {
    pub fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test slave");
        let addr = listener.local_addr().expect("local addr");
        let bank = Arc::new(Mutex::new(Bank::default()));
        let connections = Arc::new(AtomicUsize::new(0));

        let bank_clone = bank.clone();
        let connections_clone = connections.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let index = connections_clone.fetch_add(1, Ordering::SeqCst);
                let bank = bank_clone.clone();
                let drop_after_first = behavior == Behavior::DropFirstConnection && index == 0;
                thread::spawn(move || serve(stream, bank, behavior, drop_after_first));
            }
        });

        Self {
            addr,
            bank,
            connections,
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn with_bank<R>(&self, f: impl FnOnce(&mut Bank) -> R) -> R {
        let mut bank = self.bank.lock().unwrap();
        f(&mut bank)
    }
}

fn serve(mut stream: TcpStream, bank: Arc<Mutex<Bank>>, behavior: Behavior, drop_after_first: bool) {
    loop {
        let mut header = [0u8; 7];
        if stream.read_exact(&mut header).is_err() {
            return;
        }
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut pdu = vec![0u8; length.saturating_sub(1)];
        if stream.read_exact(&mut pdu).is_err() {
            return;
        }

        if drop_after_first {
            return;
        }
        if behavior == Behavior::Silent {
            continue;
        }

        let reply = {
            let mut bank = bank.lock().unwrap();
            handle(&mut bank, &pdu)
        };

        let mut frame = Vec::with_capacity(7 + reply.len());
        frame.extend_from_slice(&header[0..4]);
        frame.extend_from_slice(&((reply.len() + 1) as u16).to_be_bytes());
        frame.push(header[6]);
        frame.extend_from_slice(&reply);
        if stream.write_all(&frame).is_err() {
            return;
        }
    }
}

fn word(pdu: &[u8], offset: usize) -> usize {
    u16::from_be_bytes([pdu[offset], pdu[offset + 1]]) as usize
}

fn exception(function: u8, code: u8) -> Vec<u8> {
    vec![function | 0x80, code]
}

fn in_range(address: usize, count: usize) -> bool {
    count > 0 && address + count <= BANK_SIZE
}

fn pack(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

fn registers_reply(function: u8, values: &[u16]) -> Vec<u8> {
    let mut reply = vec![function, (values.len() * 2) as u8];
    for value in values {
        reply.extend_from_slice(&value.to_be_bytes());
    }
    reply
}

fn handle(bank: &mut Bank, pdu: &[u8]) -> Vec<u8> {
    let function = pdu[0];
    match function {
        0x01 | 0x02 => {
            let (address, count) = (word(pdu, 1), word(pdu, 3));
            if !in_range(address, count) {
                return exception(function, 0x02);
            }
            let source = if function == 0x01 {
                &bank.coils
            } else {
                &bank.discrete_inputs
            };
            let bytes = pack(&source[address..address + count]);
            let mut reply = vec![function, bytes.len() as u8];
            reply.extend_from_slice(&bytes);
            reply
        }
        0x03 | 0x04 => {
            let (address, count) = (word(pdu, 1), word(pdu, 3));
            if !in_range(address, count) {
                return exception(function, 0x02);
            }
            let source = if function == 0x03 {
                &bank.holding_registers
            } else {
                &bank.input_registers
            };
            registers_reply(function, &source[address..address + count])
        }
        0x05 => {
            let (address, value) = (word(pdu, 1), word(pdu, 3));
            if !in_range(address, 1) {
                return exception(function, 0x02);
            }
            match value {
                0xFF00 => bank.coils[address] = true,
                0x0000 => bank.coils[address] = false,
                _ => return exception(function, 0x03),
            }
            pdu.to_vec()
        }
        0x06 => {
            let address = word(pdu, 1);
            if !in_range(address, 1) {
                return exception(function, 0x02);
            }
            bank.holding_registers[address] = word(pdu, 3) as u16;
            pdu.to_vec()
        }
        0x0F => {
            let (address, count) = (word(pdu, 1), word(pdu, 3));
            if !in_range(address, count) {
                return exception(function, 0x02);
            }
            let data = &pdu[6..];
            for i in 0..count {
                bank.coils[address + i] = data[i / 8] & (1 << (i % 8)) != 0;
            }
            pdu[..5].to_vec()
        }
        0x10 => {
            let (address, count) = (word(pdu, 1), word(pdu, 3));
            if !in_range(address, count) {
                return exception(function, 0x02);
            }
            for i in 0..count {
                bank.holding_registers[address + i] = word(pdu, 6 + i * 2) as u16;
            }
            pdu[..5].to_vec()
        }
        0x16 => {
            let address = word(pdu, 1);
            if !in_range(address, 1) {
                return exception(function, 0x02);
            }
            let (and_mask, or_mask) = (word(pdu, 3) as u16, word(pdu, 5) as u16);
            let current = bank.holding_registers[address];
            bank.holding_registers[address] = (current & and_mask) | (or_mask & !and_mask);
            pdu.to_vec()
        }
        0x17 => {
            let (read_address, read_count) = (word(pdu, 1), word(pdu, 3));
            let (write_address, write_count) = (word(pdu, 5), word(pdu, 7));
            if !in_range(read_address, read_count) || !in_range(write_address, write_count) {
                return exception(function, 0x02);
            }
            for i in 0..write_count {
                bank.holding_registers[write_address + i] = word(pdu, 10 + i * 2) as u16;
            }
            registers_reply(
                function,
                &bank.holding_registers[read_address..read_address + read_count],
            )
        }
        _ => exception(function, 0x01),
    }
}
