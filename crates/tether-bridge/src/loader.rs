//! Fetching and compiling the module binary.

use std::fmt;
use std::io::{self, Read};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use wasmi::{Engine, Module};

use crate::error::{BridgeError, BridgeResult};

/// Where the module binary comes from.
pub enum ModuleSource {
    /// The whole binary, already in memory.
    Bytes(Vec<u8>),
    /// A labelled byte stream, e.g. a network response.
    Response(Response),
}

impl From<Vec<u8>> for ModuleSource {
    fn from(bytes: Vec<u8>) -> Self {
        ModuleSource::Bytes(bytes)
    }
}

impl From<Response> for ModuleSource {
    fn from(response: Response) -> Self {
        ModuleSource::Response(response)
    }
}

/// A streamed resource and the content type it was served with.
pub struct Response {
    pub content_type: Option<String>,
    pub body: Box<dyn Read>,
}

impl Response {
    pub fn new(content_type: Option<&str>, body: impl Read + 'static) -> Self {
        Self {
            content_type: content_type.map(str::to_string),
            body: Box::new(body),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Which compile path produced the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPath {
    Streaming,
    Buffered,
}

/// A compiled module with its provenance.
pub struct LoadedModule {
    pub module: Module,
    /// SHA-256 of the binary.
    pub digest: [u8; 32],
    pub path: LoadPath,
}

impl LoadedModule {
    pub fn digest_hex(&self) -> String {
        self.digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("digest", &self.digest_hex())
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Compile `source`.
///
/// Responses go through the streaming path first. Streaming refuses a body
/// whose content type is not `expected_content_type`; in that case the body
/// is buffered and compiled instead, with a warning. A streaming failure on a
/// correctly labelled body is returned as is.
pub fn load(
    engine: &Engine,
    source: ModuleSource,
    expected_content_type: &str,
) -> BridgeResult<LoadedModule> {
    match source {
        ModuleSource::Bytes(bytes) => compile_buffered(engine, &bytes),
        ModuleSource::Response(mut response) => {
            match compile_streaming(engine, &mut response, expected_content_type) {
                Ok(loaded) => Ok(loaded),
                Err(err) if !content_type_matches(&response, expected_content_type) => {
                    warn!(
                        content_type = response.content_type.as_deref().unwrap_or("<none>"),
                        expected = expected_content_type,
                        %err,
                        "streaming compile failed because the server did not label the module \
                         with the expected content type; falling back to buffered compile"
                    );
                    let mut bytes = Vec::new();
                    response
                        .body
                        .read_to_end(&mut bytes)
                        .map_err(|e| BridgeError::Load(e.to_string()))?;
                    compile_buffered(engine, &bytes)
                }
                Err(err) => Err(err),
            }
        }
    }
}

fn compile_streaming(
    engine: &Engine,
    response: &mut Response,
    expected_content_type: &str,
) -> BridgeResult<LoadedModule> {
    if !content_type_matches(response, expected_content_type) {
        return Err(BridgeError::Load(format!(
            "incorrect response MIME type: expected `{expected_content_type}`"
        )));
    }
    let mut reader = HashingReader::new(&mut response.body);
    let module = Module::new_streaming(engine, &mut reader)
        .map_err(|e| BridgeError::Load(e.to_string()))?;
    let (digest, bytes) = reader.finish();
    debug!(bytes, "module compiled from stream");
    Ok(LoadedModule {
        module,
        digest,
        path: LoadPath::Streaming,
    })
}

fn compile_buffered(engine: &Engine, bytes: &[u8]) -> BridgeResult<LoadedModule> {
    let module = Module::new(engine, bytes).map_err(|e| BridgeError::Load(e.to_string()))?;
    debug!(bytes = bytes.len(), "module compiled from buffer");
    Ok(LoadedModule {
        module,
        digest: Sha256::digest(bytes).into(),
        path: LoadPath::Buffered,
    })
}

/// Compares the MIME essence only: parameters and case are ignored.
fn content_type_matches(response: &Response, expected: &str) -> bool {
    response.content_type.as_deref().is_some_and(|label| {
        label
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .eq_ignore_ascii_case(expected)
    })
}

struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: usize,
}

impl<R: Read> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> ([u8; 32], usize) {
        (self.hasher.finalize().into(), self.bytes)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n;
        Ok(n)
    }
}
