use std::io::{self, Write};

/// Destination for filtered log lines.
pub trait LineSink: Send + Sync {
    /// `line` is written as received, without its terminator.
    fn write_line(&self, line: &[u8]) -> io::Result<()>;
}

/// Writes each line to stdout under the stdout lock so lines from
/// concurrent pods never interleave.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl LineSink for StdoutSink {
    fn write_line(&self, line: &[u8]) -> io::Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(line)?;
        out.write_all(b"\n")?;
        out.flush()
    }
}

/// Collects lines in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: parking_lot::Mutex<Vec<Vec<u8>>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .map(|l| String::from_utf8_lossy(l).into_owned())
            .collect()
    }

    pub fn raw(&self) -> Vec<Vec<u8>> {
        self.lines.lock().clone()
    }
}

#[cfg(test)]
impl LineSink for MemorySink {
    fn write_line(&self, line: &[u8]) -> io::Result<()> {
        self.lines.lock().push(line.to_vec());
        Ok(())
    }
}
