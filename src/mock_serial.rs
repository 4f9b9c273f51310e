//! We use this mocking module in unit tests to emulate the serial link to the relay station.

/// Our mock type used to emulate a serial port.
pub struct MockSerial {
    /// Everything written to the port, in order.
    write_buffer: heapless::Vec<u8, 1024>,
    /// Bytes queued for the board to read.
    read_buffer: heapless::Vec<u8, 1024>,
    /// Current position in the read buffer
    read_position: usize,
    /// Largest chunk handed out by a single read, to exercise split frames.
    read_chunk: usize,
    should_error_on_write: bool,
    should_error_on_read: bool,
    /// Fail reads once the queued bytes are used up, like an unplugged adapter.
    should_error_when_drained: bool,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum MockSerialError {
    /// Simulated buffer overflow
    #[error("Mock buffer overflow")]
    BufferOverflow,
    /// Generic simulated error for testing
    #[error("Simulated serial error")]
    SimulatedError,
    /// Would block - no data available
    #[error("No data available")]
    WouldBlock,
}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
            MockSerialError::SimulatedError => embedded_io::ErrorKind::BrokenPipe,
            MockSerialError::WouldBlock => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        self.write_buffer
            .extend_from_slice(buf)
            .map_err(|_| MockSerialError::BufferOverflow)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_read {
            return Err(MockSerialError::SimulatedError);
        }

        if self.read_position >= self.read_buffer.len() {
            if self.should_error_when_drained {
                return Err(MockSerialError::SimulatedError);
            }
            return Err(MockSerialError::WouldBlock);
        }

        let available_bytes = self.read_buffer.len() - self.read_position;
        let bytes_to_read = buf.len().min(available_bytes).min(self.read_chunk);
        buf[..bytes_to_read].copy_from_slice(
            &self.read_buffer[self.read_position..self.read_position + bytes_to_read],
        );

        self.read_position += bytes_to_read;
        Ok(bytes_to_read)
    }
}

impl MockSerial {
    /// Create a new MockSerial instance with empty buffers
    pub fn new() -> Self {
        Self {
            write_buffer: heapless::Vec::new(),
            read_buffer: heapless::Vec::new(),
            read_position: 0,
            read_chunk: usize::MAX,
            should_error_on_write: false,
            should_error_on_read: false,
            should_error_when_drained: false,
        }
    }

    /// Queue bytes behind whatever has not been read yet.
    pub fn push_read_data(&mut self, data: &[u8]) -> Result<(), MockSerialError> {
        // Compact consumed bytes first so long tests don't run out of room.
        let unread: heapless::Vec<u8, 1024> =
            heapless::Vec::from_slice(&self.read_buffer[self.read_position..])
                .map_err(|_| MockSerialError::BufferOverflow)?;
        self.read_buffer = unread;
        self.read_position = 0;
        self.read_buffer
            .extend_from_slice(data)
            .map_err(|_| MockSerialError::BufferOverflow)
    }

    /// Limit how many bytes a single read returns.
    pub fn set_read_chunk(&mut self, chunk: usize) {
        self.read_chunk = chunk.max(1);
    }

    /// Get a reference to the data that was written to this mock serial port
    pub fn written_data(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Clear the write buffer
    pub fn clear_written_data(&mut self) {
        self.write_buffer.clear();
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Configure whether read operations should fail with an error
    pub fn set_read_error(&mut self, should_error: bool) {
        self.should_error_on_read = should_error;
    }

    /// Configure whether reads fail instead of blocking once all queued data is read
    pub fn set_error_when_drained(&mut self, should_error: bool) {
        self.should_error_when_drained = should_error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Read, Write};

    #[test]
    fn test_write_multiple_times() {
        let mut mock = MockSerial::new();
        mock.write(b"Hello, ").unwrap();
        mock.write(b"World!").unwrap();
        assert_eq!(mock.written_data(), b"Hello, World!");

        mock.clear_written_data();
        mock.write(b"again").unwrap();
        assert_eq!(mock.written_data(), b"again");
    }

    #[test]
    fn test_read_respects_chunk_size() {
        let mut mock = MockSerial::new();
        mock.push_read_data(b"Hello World").unwrap();
        mock.set_read_chunk(5);

        let mut buffer = [0u8; 16];
        assert_eq!(mock.read(&mut buffer).unwrap(), 5);
        assert_eq!(&buffer[..5], b"Hello");
        assert_eq!(mock.read(&mut buffer).unwrap(), 5);
        assert_eq!(&buffer[..5], b" Worl");
    }

    #[test]
    fn test_would_block_after_data_exhausted() {
        let mut mock = MockSerial::new();
        mock.push_read_data(b"Hi").unwrap();

        let mut buffer = [0u8; 10];
        assert_eq!(mock.read(&mut buffer).unwrap(), 2);
        assert_eq!(mock.read(&mut buffer), Err(MockSerialError::WouldBlock));
    }

    #[test]
    fn test_error_when_drained() {
        let mut mock = MockSerial::new();
        mock.set_error_when_drained(true);
        mock.push_read_data(b"Hi").unwrap();

        let mut buffer = [0u8; 10];
        assert_eq!(mock.read(&mut buffer).unwrap(), 2);
        assert_eq!(mock.read(&mut buffer), Err(MockSerialError::SimulatedError));
    }

    #[test]
    fn test_push_appends_behind_unread_data() {
        let mut mock = MockSerial::new();
        mock.push_read_data(b"abc").unwrap();
        let mut buffer = [0u8; 2];
        mock.read(&mut buffer).unwrap();
        mock.push_read_data(b"de").unwrap();

        let mut rest = [0u8; 8];
        assert_eq!(mock.read(&mut rest).unwrap(), 3);
        assert_eq!(&rest[..3], b"cde");
    }

    #[test]
    fn test_error_flags_toggle() {
        let mut mock = MockSerial::new();

        mock.set_write_error(true);
        assert!(mock.write(b"test").is_err());
        assert!(mock.flush().is_err());
        mock.set_write_error(false);
        assert!(mock.write(b"test").is_ok());

        mock.push_read_data(b"data").unwrap();
        mock.set_read_error(true);
        let mut buffer = [0u8; 10];
        assert!(mock.read(&mut buffer).is_err());
        mock.set_read_error(false);
        assert!(mock.read(&mut buffer).is_ok());
    }
}
