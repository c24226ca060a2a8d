//! Debug and control requests to the BMS
//!
//! All requests travel in the multiplexed `f_Debug` message; the selector
//! picks the request kind. Requests are queued in order and flushed onto the
//! outbound queue as encoded frames.

use std::collections::VecDeque;

use chrono::{Datelike, NaiveDateTime, Timelike};
use crossbeam_channel::Sender;

use crate::codec::Codec;
use crate::shell::command::Query;
use crate::types::{BmsError, FieldMap, RawFrame, Result};

/// Name of the debug message in the DBC
pub const DEBUG_MESSAGE: &str = "f_Debug";
/// Name of its multiplexer selector
pub const DEBUG_MUX: &str = "f_Debug_Mux";
/// Response id of most queries
pub const RESPONSE_ID: u32 = 769;
/// Response id of the build configuration
pub const BUILD_CONFIG_ID: u32 = 771;
/// Number of frames of a build configuration answer
pub const BUILD_CONFIG_FRAMES: u32 = 19;

const VERSION_FLAGS: [(&str, VersionQuery); 6] = [
    ("f_Debug_VersionInfo_RequestSoftwareVersionInfo", VersionQuery::SoftwareVersion),
    ("f_Debug_VersionInfo_RequestMcuUniqueDieId", VersionQuery::McuUniqueDieId),
    ("f_Debug_VersionInfo_RequestMcuLotNumber", VersionQuery::McuLotNumber),
    ("f_Debug_VersionInfo_RequestMcuWaferInformation", VersionQuery::McuWaferInformation),
    ("f_Debug_VersionInfo_RequestCommitHash", VersionQuery::CommitHash),
    ("f_Debug_VersionInfo_RequestBuildConfiguration", VersionQuery::BuildConfiguration),
];

const TIME_FLAGS: [(&str, TimeQuery); 2] = [
    ("f_Debug_TimeInfo_RequestRtcTime", TimeQuery::RtcTime),
    ("f_Debug_TimeInfo_RequestBootTimestamp", TimeQuery::BootTimestamp),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionQuery {
    SoftwareVersion,
    McuUniqueDieId,
    McuLotNumber,
    McuWaferInformation,
    CommitHash,
    BuildConfiguration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeQuery {
    RtcTime,
    BootTimestamp,
}

/// Date as the BMS real time clock expects it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcTime {
    pub hundredth_of_seconds: u32,
    pub seconds: u32,
    pub minutes: u32,
    pub hours: u32,
    /// ISO weekday modulo 7, so Sunday is 0
    pub weekday: u32,
    pub day: u32,
    pub month: u32,
    /// Years since 2000
    pub year: i32,
}

impl RtcTime {
    pub fn from_datetime(date: &NaiveDateTime) -> Self {
        let micros = (date.nanosecond() / 1_000).min(999_999);
        Self {
            hundredth_of_seconds: micros / 10_000,
            seconds: date.second(),
            minutes: date.minute(),
            hours: date.hour(),
            weekday: date.weekday().number_from_monday() % 7,
            day: date.day(),
            month: date.month(),
            year: date.year() - 2000,
        }
    }
}

/// One request carried by the debug message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugRequest {
    VersionInfo(VersionQuery),
    SetRtc(RtcTime),
    SoftwareReset,
    FramInitialization,
    TimeInfo(TimeQuery),
    UptimeInfo,
}

impl DebugRequest {
    /// Selector label of the request kind
    pub fn selector(&self) -> &'static str {
        match self {
            DebugRequest::VersionInfo(_) => "VersionInfo",
            DebugRequest::SetRtc(_) => "Rtc",
            DebugRequest::SoftwareReset => "SoftwareReset",
            DebugRequest::FramInitialization => "FramInitialization",
            DebugRequest::TimeInfo(_) => "TimeInfo",
            DebugRequest::UptimeInfo => "UptimeInfo",
        }
    }

    /// Field map of the request; every signal of the group is set
    pub fn fields(&self) -> FieldMap {
        let fields = FieldMap::new().with(DEBUG_MUX, self.selector());
        match self {
            DebugRequest::VersionInfo(query) => VERSION_FLAGS
                .iter()
                .fold(fields, |f, (name, q)| f.with(*name, i64::from(q == query))),
            DebugRequest::TimeInfo(query) => TIME_FLAGS
                .iter()
                .fold(fields, |f, (name, q)| f.with(*name, i64::from(q == query))),
            DebugRequest::SetRtc(rtc) => fields
                .with("f_Debug_Rtc_SetHundredthOfSeconds", rtc.hundredth_of_seconds)
                .with("f_Debug_Rtc_SetSeconds", rtc.seconds)
                .with("f_Debug_Rtc_SetMinutes", rtc.minutes)
                .with("f_Debug_Rtc_SetHours", rtc.hours)
                .with("f_Debug_Rtc_SetWeekday", rtc.weekday)
                .with("f_Debug_Rtc_SetDay", rtc.day)
                .with("f_Debug_Rtc_SetMonth", rtc.month)
                .with("f_Debug_Rtc_SetYear", rtc.year),
            DebugRequest::SoftwareReset => fields.with("f_Debug_SoftwareReset_InitiateReset", 1),
            DebugRequest::FramInitialization => {
                fields.with("f_Debug_FramInitialization_InitializeFram", 1)
            }
            DebugRequest::UptimeInfo => fields.with("f_Debug_UptimeInfo_RequestUptime", 1),
        }
    }

    /// Encoded frame, padded with 0xFF
    pub fn frame(&self, codec: &Codec) -> Result<RawFrame> {
        codec.encode_frame(DEBUG_MESSAGE, &self.fields())
    }

    /// Request and expected answer of a query: (request, response id, frames)
    pub fn for_query(query: Query) -> (DebugRequest, u32, u32) {
        match query {
            Query::GetRtc => (DebugRequest::TimeInfo(TimeQuery::RtcTime), RESPONSE_ID, 1),
            Query::BootTimestamp => (DebugRequest::TimeInfo(TimeQuery::BootTimestamp), RESPONSE_ID, 1),
            Query::Uptime => (DebugRequest::UptimeInfo, RESPONSE_ID, 1),
            Query::McuWaferInfo => (
                DebugRequest::VersionInfo(VersionQuery::McuWaferInformation),
                RESPONSE_ID,
                1,
            ),
            Query::McuLotNumber => (DebugRequest::VersionInfo(VersionQuery::McuLotNumber), RESPONSE_ID, 1),
            Query::McuId => (DebugRequest::VersionInfo(VersionQuery::McuUniqueDieId), RESPONSE_ID, 1),
            Query::SoftwareVersion => (
                DebugRequest::VersionInfo(VersionQuery::SoftwareVersion),
                RESPONSE_ID,
                1,
            ),
            Query::CommitHash => (DebugRequest::VersionInfo(VersionQuery::CommitHash), RESPONSE_ID, 2),
            Query::BuildConfig => (
                DebugRequest::VersionInfo(VersionQuery::BuildConfiguration),
                BUILD_CONFIG_ID,
                BUILD_CONFIG_FRAMES,
            ),
        }
    }
}

/// FIFO of debug requests waiting for the bus
#[derive(Debug, Clone)]
pub struct DebugQueue {
    codec: Codec,
    pending: VecDeque<DebugRequest>,
}

impl DebugQueue {
    /// Fails when the database has no usable debug message
    pub fn new(codec: Codec) -> Result<Self> {
        let message = codec.database().get_message_by_name(DEBUG_MESSAGE).ok_or_else(|| {
            BmsError::ConfigError(format!(
                "The CAN database has no '{}' message.",
                DEBUG_MESSAGE
            ))
        })?;
        if message.selector().map(|s| s.name.as_str()) != Some(DEBUG_MUX) {
            return Err(BmsError::ConfigError(format!(
                "Message '{}' is not multiplexed by '{}'.",
                DEBUG_MESSAGE, DEBUG_MUX
            )));
        }
        Ok(Self {
            codec,
            pending: VecDeque::new(),
        })
    }

    pub fn push(&mut self, request: DebugRequest) {
        log::debug!("Queued debug request {:?}", request);
        self.pending.push_back(request);
    }

    pub fn reinitialize_fram(&mut self) {
        self.push(DebugRequest::FramInitialization);
    }

    pub fn software_reset(&mut self) {
        self.push(DebugRequest::SoftwareReset);
    }

    pub fn set_rtc(&mut self, now: &NaiveDateTime) {
        self.push(DebugRequest::SetRtc(RtcTime::from_datetime(now)));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Encode the queued requests in order onto `outbound`
    ///
    /// Requests that fail to encode are logged and dropped.
    pub fn flush(&mut self, outbound: &Sender<RawFrame>) -> Result<usize> {
        let mut sent = 0;
        while let Some(request) = self.pending.pop_front() {
            match request.frame(&self.codec) {
                Ok(frame) => {
                    log::debug!(
                        "Sending {} request: {}",
                        request.selector(),
                        frame.data_hex()
                    );
                    outbound.send(frame).map_err(|_| {
                        BmsError::AdapterOpError("Outbound queue is closed".to_string())
                    })?;
                    sent += 1;
                }
                Err(e) => log::info!("Dropping {:?}: {}", request, e),
            }
        }
        Ok(sent)
    }
}
