// fortran_io.rs - Unformatted sequential records written by the simulation binary,
// and the namelist descriptor that drives it.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_complex::Complex64;
use tracing::debug;

use crate::error::{Result, SqmError};

/// Largest lattice the reader accepts; anything bigger is treated as a corrupt record.
pub const MAX_NX: i32 = 1000;

/// Bytes in the header payload: Nx (i4), U (f8), mu (f8), Ntau (i4).
const HEADER_BYTES: usize = 4 + 8 + 8 + 4;

/// Bytes in one complex128 element.
const COMPLEX_BYTES: usize = 16;

/// Run parameters stored in the first record of every data file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub nx: i32,
    pub u: f64,
    pub mu: f64,
    pub ntau: i32,
}

impl Header {
    /// Lattice size as an index bound. Only valid after `decode` checked the range.
    pub fn lattice_size(&self) -> usize {
        self.nx as usize
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() != HEADER_BYTES {
            return Err(SqmError::Format(format!(
                "header record has {} bytes, expected {HEADER_BYTES}",
                payload.len()
            )));
        }
        let mut cur = payload;
        let nx = cur.read_i32::<LittleEndian>()?;
        let u = cur.read_f64::<LittleEndian>()?;
        let mu = cur.read_f64::<LittleEndian>()?;
        let ntau = cur.read_i32::<LittleEndian>()?;

        if !(1..=MAX_NX).contains(&nx) {
            return Err(SqmError::Format(format!(
                "Nx out of range (1-{MAX_NX}): {nx}"
            )));
        }
        Ok(Self { nx, u, mu, ntau })
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_BYTES);
        // Writes into a Vec cannot fail.
        let _ = buf.write_i32::<LittleEndian>(self.nx);
        let _ = buf.write_f64::<LittleEndian>(self.u);
        let _ = buf.write_f64::<LittleEndian>(self.mu);
        let _ = buf.write_i32::<LittleEndian>(self.ntau);
        buf
    }
}

/// One Monte-Carlo draw: the field and its conjugate partner on every site.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub a: Vec<Complex64>,
    pub a_ast: Vec<Complex64>,
}

impl Sample {
    fn decode(payload: &[u8], nx: usize) -> Result<Self> {
        let expected = 2 * nx * COMPLEX_BYTES;
        if payload.len() != expected {
            return Err(SqmError::Format(format!(
                "body record has {} bytes, expected {expected}",
                payload.len()
            )));
        }
        let mut cur = payload;
        let read_vec = |cur: &mut &[u8]| -> io::Result<Vec<Complex64>> {
            (0..nx)
                .map(|_| {
                    let re = cur.read_f64::<LittleEndian>()?;
                    let im = cur.read_f64::<LittleEndian>()?;
                    Ok(Complex64::new(re, im))
                })
                .collect()
        };
        let a = read_vec(&mut cur)?;
        let a_ast = read_vec(&mut cur)?;
        Ok(Self { a, a_ast })
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity((self.a.len() + self.a_ast.len()) * COMPLEX_BYTES);
        for z in self.a.iter().chain(self.a_ast.iter()) {
            let _ = buf.write_f64::<LittleEndian>(z.re);
            let _ = buf.write_f64::<LittleEndian>(z.im);
        }
        buf
    }
}

/// Bytes in one record length marker.
const MARKER_BYTES: u64 = 4;

/// Read one `[len][payload][len]` record. `Ok(None)` on a clean end of file.
///
/// `remaining` is the number of unread bytes in the file. A leading marker that
/// promises more than that is rejected before the payload buffer is allocated.
fn read_record<R: BufRead>(rdr: &mut R, remaining: &mut u64) -> Result<Option<Vec<u8>>> {
    if rdr.fill_buf()?.is_empty() {
        return Ok(None);
    }
    let head = rdr.read_i32::<LittleEndian>().map_err(truncated)?;
    if head < 0 {
        return Err(SqmError::Format(format!("negative record length {head}")));
    }
    let record_bytes = head as u64 + 2 * MARKER_BYTES;
    if record_bytes > *remaining {
        return Err(SqmError::Format(format!(
            "truncated record: length {head} but only {} bytes left",
            remaining.saturating_sub(2 * MARKER_BYTES)
        )));
    }
    let mut payload = vec![0u8; head as usize];
    rdr.read_exact(&mut payload).map_err(truncated)?;
    let tail = rdr.read_i32::<LittleEndian>().map_err(truncated)?;
    if tail != head {
        return Err(SqmError::Format(format!(
            "record markers disagree: leading {head}, trailing {tail}"
        )));
    }
    *remaining -= record_bytes;
    Ok(Some(payload))
}

fn truncated(e: io::Error) -> SqmError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        SqmError::Format("truncated record".into())
    } else {
        SqmError::Io(e)
    }
}

fn write_record<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = payload.len() as i32;
    w.write_i32::<LittleEndian>(len)?;
    w.write_all(payload)?;
    w.write_i32::<LittleEndian>(len)
}

/// Read a data file: the header record followed by body records until end of file.
pub fn read_dat(path: impl AsRef<Path>) -> Result<(Header, Vec<Sample>)> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SqmError::NotFound(path.to_path_buf()));
    }
    let mut remaining = fs::metadata(path)?.len();
    if remaining == 0 {
        return Err(SqmError::EmptyFile(path.to_path_buf()));
    }

    let mut rdr = BufReader::new(File::open(path)?);
    let payload = read_record(&mut rdr, &mut remaining)?
        .ok_or_else(|| SqmError::Format("header record missing".into()))?;
    let header = Header::decode(&payload)?;
    debug!(nx = header.nx, "header read from {}", path.display());

    let nx = header.lattice_size();
    let mut samples = Vec::new();
    while let Some(payload) = read_record(&mut rdr, &mut remaining)? {
        samples.push(Sample::decode(&payload, nx)?);
    }
    Ok((header, samples))
}

/// Write a data file in the same layout the simulation binary produces.
pub fn write_dat(path: impl AsRef<Path>, header: &Header, samples: &[Sample]) -> Result<()> {
    let mut w = BufWriter::new(File::create(path.as_ref())?);
    write_record(&mut w, &header.encode())?;
    for s in samples {
        write_record(&mut w, &s.encode())?;
    }
    w.flush()?;
    Ok(())
}

/// Output file the simulation writes for one parameter point.
pub fn dat_filename(u: f64, mu: f64, s_end: &str) -> String {
    format!("U={u:?},mu={mu:?},s={s_end}.dat")
}

/// Descriptor file handed to the simulation for one parameter point.
pub fn params_filename(u: f64, mu: f64) -> String {
    format!("params_U={u:?}_mu={mu:?}.dat")
}

/// Contents of a namelist descriptor.
///
/// `dtau`, `ds` and `s_end` are passed through verbatim as Fortran literals
/// (e.g. `0.3d0`), so they stay strings.
#[derive(Debug, Clone)]
pub struct Descriptor<'a> {
    pub mu: f64,
    pub u: f64,
    pub dtau: &'a str,
    pub ds: &'a str,
    pub s_end: &'a str,
    pub datfilename: &'a str,
    pub nsample: u32,
}

impl Descriptor<'_> {
    pub fn render(&self) -> String {
        format!(
            "&params\n\
             mu = {:?}\n\
             U = {:?}\n\
             dtau = {}\n\
             ds = {}\n\
             s_end = {}\n\
             datfilename = \"{}\"\n\
             /\n\
             &sampling_setting\n\
             Nsample = {}\n\
             /\n",
            self.mu, self.u, self.dtau, self.ds, self.s_end, self.datfilename, self.nsample
        )
    }

    /// Write the descriptor, creating parent directories as needed.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render())?;
        Ok(())
    }
}
