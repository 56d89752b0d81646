pub mod decode;
pub mod file;
pub mod header;
pub mod track;

pub use decode::{decode_integer, decode_vlq, encode_vlq, SmfReader};
pub use file::read_smf_file;
pub use header::{decode_header, SmfFormat, SmfHeader, TimeDivision};
pub use track::{MidiEventHandler, TrackScheduler, DEFAULT_TEMPO, MAX_TRACKS};
