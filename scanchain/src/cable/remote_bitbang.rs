//! Cable driver for the OpenOCD remote bitbang protocol.
//!
//! The protocol is described in the OpenOCD documentation:
//! [remote_bitbang](https://github.com/openocd-org/openocd/blob/b6b4f9d46a48aadc1de6bb5152ff4913661c9059/doc/manual/jtag/drivers/remote_bitbang.txt).
//! Every command is a single ASCII character. Commands are collected in a packet buffer and
//! only sent once a response is needed or the buffer is flushed, so a whole transfer costs a
//! single round trip.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use bitvec::prelude::*;

use super::{CableDriver, CableError, CableFactory, FlushStrategy, PodSignals};

/// Address used when no parameter is given.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:44853";

const SOCKET_TIMEOUT: Duration = Duration::from_millis(500);

/// Encodes TAP operations as remote bitbang commands over a TCP connection.
#[derive(Debug)]
pub struct BitBangAdapter<S: Read + Write> {
    socket: S,
    packet: Vec<u8>,
}

impl BitBangAdapter<TcpStream> {
    pub fn connect(address: &str) -> io::Result<Self> {
        let socket = TcpStream::connect(address)?;
        socket.set_read_timeout(Some(SOCKET_TIMEOUT))?;
        socket.set_write_timeout(Some(SOCKET_TIMEOUT))?;
        socket.set_nodelay(true)?;
        Ok(Self::new(socket))
    }
}

impl<S: Read + Write> BitBangAdapter<S> {
    pub fn new(socket: S) -> Self {
        Self {
            socket,
            packet: Vec::with_capacity(1024),
        }
    }

    /// Send everything collected so far.
    pub fn flush(&mut self) -> io::Result<()> {
        if self.packet.is_empty() {
            return Ok(());
        }
        self.socket.write_all(&self.packet)?;
        self.socket.flush()?;
        self.packet.clear();
        Ok(())
    }

    /// Control the reset lines, `true` meaning asserted.
    pub fn reset(&mut self, trst: bool, srst: bool) {
        let command = match (trst, srst) {
            (false, false) => b'r',
            (false, true) => b's',
            (true, false) => b't',
            (true, true) => b'u',
        };
        self.packet.push(command);
    }

    /// Set the levels of TCK, TMS and TDI.
    pub fn write(&mut self, tck: bool, tms: bool, tdi: bool) {
        let command = b'0' + ((tck as u8) << 2 | (tms as u8) << 1 | tdi as u8);
        self.packet.push(command);
    }

    /// One TCK cycle. TDI and TMS are sampled by the target on the rising edge.
    pub fn pulse(&mut self, tms: bool, tdi: bool) {
        self.write(false, tms, tdi);
        self.write(true, tms, tdi);
    }

    /// Ask for a TDO sample, answered by [`read_responses`](Self::read_responses).
    pub fn request_read(&mut self) {
        self.packet.push(b'R');
    }

    /// Send the packet and read `count` TDO samples.
    pub fn read_responses(&mut self, count: usize) -> io::Result<Vec<bool>> {
        self.flush()?;

        let mut responses = vec![0u8; count];
        self.socket.read_exact(&mut responses)?;

        responses
            .into_iter()
            .map(|response| match response {
                b'0' => Ok(false),
                b'1' => Ok(true),
                other => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected TDO response {other:#04x}"),
                )),
            })
            .collect()
    }

    /// Tell the server we are done.
    pub fn quit(&mut self) -> io::Result<()> {
        self.packet.push(b'Q');
        self.flush()
    }
}

/// A cable talking to a remote bitbang server, e.g. a simulator or an OpenOCD compatible
/// adapter bridge.
#[derive(Debug)]
pub struct RemoteBitbangCable<S: Read + Write> {
    adapter: BitBangAdapter<S>,
    signals: PodSignals,
}

impl<S: Read + Write> RemoteBitbangCable<S> {
    pub fn new(adapter: BitBangAdapter<S>) -> Self {
        Self {
            adapter,
            signals: PodSignals::TRST | PodSignals::RESET,
        }
    }
}

impl<S: Read + Write + std::fmt::Debug> CableDriver for RemoteBitbangCable<S> {
    fn name(&self) -> &str {
        "remote_bitbang"
    }

    fn init(&mut self) -> Result<(), CableError> {
        self.adapter.reset(false, false);
        self.adapter.flush()?;
        Ok(())
    }

    fn done(&mut self) -> Result<(), CableError> {
        self.adapter.quit()?;
        Ok(())
    }

    fn set_frequency(&mut self, _frequency_hz: u32) -> Result<u32, CableError> {
        // The server clocks as fast as the connection allows.
        Ok(0)
    }

    fn clock(&mut self, tms: bool, tdi: bool, count: usize) -> Result<(), CableError> {
        for _ in 0..count {
            self.adapter.pulse(tms, tdi);
        }
        Ok(())
    }

    fn get_tdo(&mut self) -> Result<bool, CableError> {
        self.adapter.write(false, false, false);
        self.adapter.request_read();
        let tdo = self.adapter.read_responses(1)?;
        Ok(tdo.first().copied().unwrap_or(false))
    }

    fn transfer(
        &mut self,
        input: &BitSlice<u8, Lsb0>,
        output: Option<&mut BitSlice<u8, Lsb0>>,
    ) -> Result<(), CableError> {
        match output {
            Some(output) => {
                for tdi in input.iter().by_vals() {
                    self.adapter.write(false, false, tdi);
                    self.adapter.request_read();
                    self.adapter.write(true, false, tdi);
                }
                let tdo = self.adapter.read_responses(input.len())?;
                for (i, bit) in tdo.into_iter().enumerate().take(output.len()) {
                    output.set(i, bit);
                }
            }
            None => {
                for tdi in input.iter().by_vals() {
                    self.adapter.pulse(false, tdi);
                }
            }
        }
        Ok(())
    }

    fn set_signal(
        &mut self,
        mask: PodSignals,
        value: PodSignals,
    ) -> Result<PodSignals, CableError> {
        let old = self.signals;
        let mask = mask & (PodSignals::TRST | PodSignals::RESET);
        self.signals = (old - mask) | (value & mask);

        if self.signals != old {
            // Both lines are active low.
            self.adapter.reset(
                !self.signals.contains(PodSignals::TRST),
                !self.signals.contains(PodSignals::RESET),
            );
            self.adapter.flush()?;
        }
        Ok(old)
    }

    fn get_signal(&mut self, signal: PodSignals) -> Result<bool, CableError> {
        Ok(self.signals.contains(signal))
    }

    fn flush_strategy(&self) -> FlushStrategy {
        FlushStrategy::CombineTransfers
    }

    fn flush(&mut self) -> Result<(), CableError> {
        self.adapter.flush()?;
        Ok(())
    }
}

/// Opens a [`RemoteBitbangCable`]. The optional parameter is the `host:port` of the server,
/// [`DEFAULT_ADDRESS`] otherwise.
#[derive(Debug)]
pub struct RemoteBitbangFactory;

impl CableFactory for RemoteBitbangFactory {
    fn name(&self) -> &'static str {
        "remote_bitbang"
    }

    fn description(&self) -> &'static str {
        "OpenOCD remote bitbang protocol over TCP"
    }

    fn open(&self, params: &[&str]) -> Result<Box<dyn CableDriver>, CableError> {
        let address = match params {
            [] => DEFAULT_ADDRESS,
            [address] => *address,
            [_, extra, ..] => return Err(CableError::InvalidParameter(extra.to_string())),
        };

        let adapter = BitBangAdapter::connect(address)?;
        tracing::debug!("Connected to remote bitbang server at {}", address);
        Ok(Box::new(RemoteBitbangCable::new(adapter)))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;

    use super::*;
    use crate::cable::{Cable, FlushAmount};
    use crate::config::QueueConfig;
    use pretty_assertions::assert_eq;

    /// In-memory stand-in for the socket: reads come from `input`, writes go to `output`.
    #[derive(Debug, Default)]
    struct Loopback {
        input: Cursor<Vec<u8>>,
        output: Rc<RefCell<Vec<u8>>>,
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn cable(responses: &[u8]) -> RemoteBitbangCable<Loopback> {
        let socket = Loopback {
            input: Cursor::new(responses.to_vec()),
            output: Rc::default(),
        };
        RemoteBitbangCable::new(BitBangAdapter::new(socket))
    }

    fn sent(cable: &mut RemoteBitbangCable<Loopback>) -> String {
        cable.adapter.flush().unwrap();
        String::from_utf8(cable.adapter.socket.output.borrow().clone()).unwrap()
    }

    fn wire(output: &Rc<RefCell<Vec<u8>>>) -> String {
        String::from_utf8(output.borrow().clone()).unwrap()
    }

    #[test]
    fn flushing_the_cable_puts_commands_on_the_wire() {
        let driver = cable(b"");
        let output = driver.adapter.socket.output.clone();
        let mut cable = Cable::new(Box::new(driver), &QueueConfig::default());
        cable.init().unwrap();
        assert_eq!(wire(&output), "r");

        cable.defer_clock(true, true, 3).unwrap();
        assert_eq!(wire(&output), "r");

        cable.flush(FlushAmount::ToOutput).unwrap();
        assert_eq!(cable.pending(), 0);
        assert_eq!(wire(&output), "r373737");

        cable.clock(false, false, 1).unwrap();
        assert_eq!(wire(&output), "r37373704");

        cable
            .transfer(bits![u8, Lsb0; 1], None)
            .unwrap();
        assert_eq!(wire(&output), "r3737370415");
    }

    #[test]
    fn clocks_are_encoded_as_pin_writes() {
        let mut cable = cable(b"");
        cable.clock(true, false, 2).unwrap();
        cable.clock(false, true, 1).unwrap();
        assert_eq!(sent(&mut cable), "262615");
    }

    #[test]
    fn capturing_transfer_is_one_round_trip() {
        let mut cable = cable(b"101");
        let mut output = bitvec![u8, Lsb0; 0; 3];
        cable
            .transfer(bits![u8, Lsb0; 1, 1, 0], Some(output.as_mut_bitslice()))
            .unwrap();

        assert_eq!(output.as_bitslice(), bits![u8, Lsb0; 1, 0, 1]);
        assert_eq!(sent(&mut cable), "1R51R50R4");
    }

    #[test]
    fn reset_lines_are_active_low() {
        let mut cable = cable(b"");
        let old = cable
            .set_signal(PodSignals::TRST, PodSignals::empty())
            .unwrap();
        assert!(old.contains(PodSignals::TRST));
        cable
            .set_signal(PodSignals::TRST, PodSignals::TRST)
            .unwrap();
        assert_eq!(sent(&mut cable), "tr");
        assert!(cable.get_signal(PodSignals::TRST).unwrap());
    }

    #[test]
    fn garbage_response_is_an_error() {
        let mut cable = cable(b"x");
        assert!(matches!(cable.get_tdo(), Err(CableError::Io(_))));
    }

    #[test]
    fn too_many_parameters() {
        assert!(matches!(
            RemoteBitbangFactory.open(&["localhost:1", "extra"]),
            Err(CableError::InvalidParameter(p)) if p == "extra"
        ));
    }
}
