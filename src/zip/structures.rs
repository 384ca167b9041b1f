use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: u32 = 0x0403_4B50;
pub const LFH_SIZE: usize = 30;

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: u32 = 0x0201_4B50;
pub const CDFH_MIN_SIZE: usize = 46;

/// End of Central Directory (EOCD) - 22 bytes minimum
pub const EOCD_SIGNATURE: u32 = 0x0605_4B50;
pub const EOCD_SIZE: usize = 22;

/// ZIP64 End of Central Directory - 56 bytes minimum
pub const EOCD64_SIGNATURE: u32 = 0x0606_4B50;
pub const EOCD64_SIZE: usize = 56;

/// ZIP64 End of Central Directory Locator - 20 bytes
pub const EOCD64_LOCATOR_SIGNATURE: u32 = 0x0706_4B50;
pub const EOCD64_LOCATOR_SIZE: usize = 20;

/// Markers that may precede the first local header of a spanned archive.
pub const SPANNING_SIGNATURE: u32 = 0x0807_4B50;
pub const SPANNING_TEMP_SIGNATURE: u32 = 0x3030_4B50;

/// ZIP64 extended information extra field
pub const ZIP64_EXTRA_ID: u16 = 0x0001;
pub const ZIP64_EXTRA_SIZE: u16 = 28;

/// Sentinels written into native fields whose value lives elsewhere.
pub const U16_SENTINEL: u16 = 0xFFFF;
pub const U32_SENTINEL: u32 = 0xFFFF_FFFF;

/// General purpose flag: name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 0x0800;

pub const VERSION_DEFAULT: u16 = 20;
pub const VERSION_ZIP64: u16 = 45;

/// MS-DOS attribute bits as stored in the external attributes field.
pub const ATTR_READONLY: u32 = 0x01;
pub const ATTR_DIRECTORY: u32 = 0x10;
pub const ATTR_ARCHIVE: u32 = 0x20;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, CompressionMethod::Unknown(_))
    }
}

/// Compression level used when packing.
///
/// `None` stores entries uncompressed; every other level deflates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    None,
    Min,
    #[default]
    Normal,
    Max,
    /// Explicit deflate level, 1..=9
    Level(u32),
}

impl CompressionLevel {
    pub fn method(&self) -> CompressionMethod {
        match self {
            CompressionLevel::None | CompressionLevel::Level(0) => CompressionMethod::Stored,
            _ => CompressionMethod::Deflate,
        }
    }

    pub fn to_flate2(self) -> flate2::Compression {
        match self {
            CompressionLevel::None => flate2::Compression::none(),
            CompressionLevel::Min => flate2::Compression::fast(),
            CompressionLevel::Normal => flate2::Compression::default(),
            CompressionLevel::Max => flate2::Compression::best(),
            CompressionLevel::Level(level) => flate2::Compression::new(level.min(9)),
        }
    }
}

/// MS-DOS packed date and time, as stored in ZIP headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable instant.
    pub const EPOCH: DosDateTime = DosDateTime {
        date: (1 << 5) | 1,
        time: 0,
    };

    pub fn new(date: u16, time: u16) -> Self {
        Self { date, time }
    }

    /// Pack a timestamp. Years outside 1980..=2107 clamp to the nearest end;
    /// seconds round down to an even number.
    pub fn from_datetime(value: &NaiveDateTime) -> Self {
        let year = value.year();
        if year < 1980 {
            return Self::EPOCH;
        }
        if year > 2107 {
            return Self {
                date: (127 << 9) | (12 << 5) | 31,
                time: (23 << 11) | (59 << 5) | 29,
            };
        }
        let date = (((year - 1980) as u16) << 9) | ((value.month() as u16) << 5) | value.day() as u16;
        let time = ((value.hour() as u16) << 11)
            | ((value.minute() as u16) << 5)
            | (value.second() as u16 / 2);
        Self { date, time }
    }

    /// Unpack into a timestamp, `None` if the fields do not form a valid date.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        let (year, month, day) = self.date_parts();
        let (hour, minute, second) = self.time_parts();
        NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?.and_hms_opt(
            hour as u32,
            minute as u32,
            second as u32,
        )
    }

    /// Parse modification date to (year, month, day)
    pub fn date_parts(&self) -> (u16, u8, u8) {
        let day = (self.date & 0x1F) as u8;
        let month = ((self.date >> 5) & 0x0F) as u8;
        let year = ((self.date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn time_parts(&self) -> (u8, u8, u8) {
        let second = ((self.time & 0x1F) * 2) as u8;
        let minute = ((self.time >> 5) & 0x3F) as u8;
        let hour = ((self.time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }
}

/// Decoded information about one archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipFileInfo {
    pub name: String,
    /// Volume holding the entry's local header
    pub volume: u32,
    pub attributes: u32,
    pub last_write: Option<NaiveDateTime>,
    pub length: u64,
    pub compressed_length: u64,
    pub method: CompressionMethod,
    pub crc32: u32,
}

impl ZipFileInfo {
    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }
}
