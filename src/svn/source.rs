use std::ffi::OsString;
use std::io::{BufReader, Read as _, Seek as _};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub(crate) enum OpenError {
    Metadata { path: PathBuf, error: std::io::Error },
    FileOpen { path: PathBuf, error: std::io::Error },
    FileRead { path: PathBuf, error: std::io::Error },
    Decoder { path: PathBuf, error: std::io::Error },
    SpawnProcess { arg0: OsString, error: std::io::Error },
}

impl std::fmt::Display for OpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Metadata { path, error } => {
                write!(f, "failed to fetch metadata for {path:?}: {error}")
            }
            Self::FileOpen { path, error } => write!(f, "failed to open file {path:?}: {error}"),
            Self::FileRead { path, error } => write!(f, "failed to read file {path:?}: {error}"),
            Self::Decoder { path, error } => {
                write!(f, "failed to initialize decompression of {path:?}: {error}")
            }
            Self::SpawnProcess { arg0, error } => {
                write!(f, "failed to spawn process {arg0:?}: {error}")
            }
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Compression {
    None,
    Zstd,
    Gzip,
    Bzip2,
    Xz,
    Lz4,
}

impl Compression {
    fn sniff(header: &[u8]) -> Self {
        const MAGICS: &[(&[u8], Compression)] = &[
            (&[0x28, 0xB5, 0x2F, 0xFD], Compression::Zstd),
            (&[0x1F, 0x8B], Compression::Gzip),
            (b"BZh", Compression::Bzip2),
            (&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00], Compression::Xz),
            (&[0x04, 0x22, 0x4D, 0x18], Compression::Lz4),
        ];

        MAGICS
            .iter()
            .find(|(magic, _)| header.starts_with(magic))
            .map_or(Self::None, |&(_, compression)| compression)
    }
}

/// Where the dump stream comes from: a (maybe compressed) dump file, or a
/// dumping process.
pub(crate) enum LogSource {
    File(Box<dyn std::io::BufRead>),
    Command(std::process::Child, BufReader<std::process::ChildStdout>),
}

impl LogSource {
    pub(crate) fn open(path: &Path, remote: bool) -> Result<Self, OpenError> {
        if remote {
            return Self::spawn("svnrdump", path);
        }

        let path_meta = std::fs::metadata(path).map_err(|error| OpenError::Metadata {
            path: path.to_path_buf(),
            error,
        })?;
        if path_meta.is_dir() {
            return Self::spawn("svnadmin", path);
        }

        let mut file = std::fs::File::open(path).map_err(|error| OpenError::FileOpen {
            path: path.to_path_buf(),
            error,
        })?;

        let mut header = [0; 6];
        let mut header_len = 0;
        while header_len < header.len() {
            match file.read(&mut header[header_len..]) {
                Ok(0) => break,
                Ok(n) => header_len += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(error) => {
                    return Err(OpenError::FileRead {
                        path: path.to_path_buf(),
                        error,
                    });
                }
            }
        }
        file.rewind().map_err(|error| OpenError::FileRead {
            path: path.to_path_buf(),
            error,
        })?;

        let compression = Compression::sniff(&header[..header_len]);
        tracing::debug!("reading {path:?} with compression {compression:?}");

        let stream: Box<dyn std::io::BufRead> = match compression {
            Compression::None => Box::new(BufReader::new(file)),
            Compression::Zstd => {
                let decoder =
                    zstd::stream::read::Decoder::new(file).map_err(|error| OpenError::Decoder {
                        path: path.to_path_buf(),
                        error,
                    })?;
                Box::new(BufReader::new(decoder))
            }
            Compression::Gzip => Box::new(BufReader::new(flate2::read::MultiGzDecoder::new(file))),
            Compression::Bzip2 => Box::new(BufReader::new(bzip2::read::BzDecoder::new(file))),
            Compression::Xz => Box::new(BufReader::new(liblzma::read::XzDecoder::new(file))),
            Compression::Lz4 => Box::new(BufReader::new(lz4_flex::frame::FrameDecoder::new(file))),
        };

        Ok(Self::File(stream))
    }

    fn spawn(program: &str, target: &Path) -> Result<Self, OpenError> {
        let mut child = std::process::Command::new(program)
            .arg("dump")
            .arg(target)
            .arg("-q")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .spawn()
            .map_err(|error| OpenError::SpawnProcess {
                arg0: program.into(),
                error,
            })?;
        let Some(stdout) = child.stdout.take() else {
            unreachable!("stdout is piped");
        };
        Ok(Self::Command(child, BufReader::new(stdout)))
    }

    pub(crate) fn close(self) -> Result<(), std::io::Error> {
        match self {
            Self::File(_) => Ok(()),
            Self::Command(mut child, stdout) => {
                drop(stdout);
                let status = child.wait()?;
                if status.success() {
                    Ok(())
                } else {
                    Err(std::io::Error::other(format!(
                        "dump process finished with {status}"
                    )))
                }
            }
        }
    }

    pub(crate) fn stream(&mut self) -> &mut dyn std::io::BufRead {
        match self {
            Self::File(stream) => stream.as_mut(),
            Self::Command(_, stdout) => stdout,
        }
    }
}
