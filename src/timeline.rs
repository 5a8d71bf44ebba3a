//! Timeline synchronization.
//!
//! A [`TimelineController`] keeps a video element and a chart view showing
//! the same instant of a session. At most one of them drives time; the
//! other follows on every synchronization tick.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, BitXor, BitXorAssign};
use std::rc::{Rc, Weak};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info};

use crate::config::TimelineConfig;
use crate::scheduler::Scheduler;
use crate::types::TimeRange;
use crate::utils::datetime_to_ticks;
use crate::TIME_DIMENSION;

/// Bit set over the playback states
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PlaybackMode(u8);

impl PlaybackMode {
    pub const NONE: PlaybackMode = PlaybackMode(0);
    pub const DRIVEN_BY_VIDEO: PlaybackMode = PlaybackMode(1);
    pub const DRIVEN_BY_CHART: PlaybackMode = PlaybackMode(1 << 1);
    pub const SUSPENDED: PlaybackMode = PlaybackMode(1 << 2);

    const DRIVERS: PlaybackMode = PlaybackMode(0b011);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: PlaybackMode) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: PlaybackMode) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: PlaybackMode) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: PlaybackMode) {
        self.0 &= !other.0;
    }

    /// The driving source, video first if both bits are set
    pub fn driver(self) -> Option<Driver> {
        if self.contains(Self::DRIVEN_BY_VIDEO) {
            Some(Driver::Video)
        } else if self.contains(Self::DRIVEN_BY_CHART) {
            Some(Driver::Chart)
        } else {
            None
        }
    }
}

impl BitOr for PlaybackMode {
    type Output = PlaybackMode;

    fn bitor(self, rhs: PlaybackMode) -> PlaybackMode {
        PlaybackMode(self.0 | rhs.0)
    }
}

impl BitOrAssign for PlaybackMode {
    fn bitor_assign(&mut self, rhs: PlaybackMode) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for PlaybackMode {
    type Output = PlaybackMode;

    fn bitand(self, rhs: PlaybackMode) -> PlaybackMode {
        PlaybackMode(self.0 & rhs.0)
    }
}

impl BitXor for PlaybackMode {
    type Output = PlaybackMode;

    fn bitxor(self, rhs: PlaybackMode) -> PlaybackMode {
        PlaybackMode(self.0 ^ rhs.0)
    }
}

impl BitXorAssign for PlaybackMode {
    fn bitxor_assign(&mut self, rhs: PlaybackMode) {
        self.0 ^= rhs.0;
    }
}

impl fmt::Debug for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let names: Vec<&str> = [
            (Self::DRIVEN_BY_VIDEO, "DRIVEN_BY_VIDEO"),
            (Self::DRIVEN_BY_CHART, "DRIVEN_BY_CHART"),
            (Self::SUSPENDED, "SUSPENDED"),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
        f.write_str(&names.join(" | "))
    }
}

/// A collaborator that can claim control of the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Driver {
    Video,
    Chart,
}

impl Driver {
    pub fn mode(self) -> PlaybackMode {
        match self {
            Driver::Video => PlaybackMode::DRIVEN_BY_VIDEO,
            Driver::Chart => PlaybackMode::DRIVEN_BY_CHART,
        }
    }
}

/// Chart view. Times are offsets in ticks from the session start.
pub trait ChartSink {
    fn current_time(&self) -> i64;
    fn set_current_time(&mut self, offset: i64);
    fn shift_current_time(&mut self, delta: i64);
    /// False while the data under the current time is not loaded yet
    fn ready_for_playback(&self) -> bool;
    fn set_time_range(&mut self, range: TimeRange);
}

/// Media element. Times are offsets in seconds from the session start.
pub trait VideoSink {
    fn current_time(&self) -> f64;
    fn set_current_time(&mut self, seconds: f64);
    fn is_playing(&self) -> bool;
    fn is_ready(&self) -> bool;
    fn play(&mut self);
    fn pause(&mut self);
}

impl<T: ChartSink + ?Sized> ChartSink for Rc<RefCell<T>> {
    fn current_time(&self) -> i64 {
        self.borrow().current_time()
    }

    fn set_current_time(&mut self, offset: i64) {
        self.borrow_mut().set_current_time(offset)
    }

    fn shift_current_time(&mut self, delta: i64) {
        self.borrow_mut().shift_current_time(delta)
    }

    fn ready_for_playback(&self) -> bool {
        self.borrow().ready_for_playback()
    }

    fn set_time_range(&mut self, range: TimeRange) {
        self.borrow_mut().set_time_range(range)
    }
}

impl<T: VideoSink + ?Sized> VideoSink for Rc<RefCell<T>> {
    fn current_time(&self) -> f64 {
        self.borrow().current_time()
    }

    fn set_current_time(&mut self, seconds: f64) {
        self.borrow_mut().set_current_time(seconds)
    }

    fn is_playing(&self) -> bool {
        self.borrow().is_playing()
    }

    fn is_ready(&self) -> bool {
        self.borrow().is_ready()
    }

    fn play(&mut self) {
        self.borrow_mut().play()
    }

    fn pause(&mut self) {
        self.borrow_mut().pause()
    }
}

/// Source of "now" for live sessions, in absolute ticks
pub trait Clock {
    fn now(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        datetime_to_ticks(&Utc::now().naive_utc())
    }
}

/// Clock set by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<i64>>,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        ManualClock {
            now: Rc::new(Cell::new(now)),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.set(now);
    }

    pub fn advance(&self, ticks: i64) {
        self.now.set(self.now.get() + ticks);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.get()
    }
}

/// Undo token returned by [`TimelineController::start_navigation`].
///
/// Hand it back to [`TimelineController::restore`] exactly once.
#[must_use = "navigation stays suspended until the token is restored"]
#[derive(Debug)]
pub struct Restore {
    previous: Option<Driver>,
    set: PlaybackMode,
}

impl Restore {
    /// True when this token is the one that set the suspended bit
    pub fn suspended_here(&self) -> bool {
        self.set == PlaybackMode::SUSPENDED
    }
}

/// What a synchronization tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Suspended,
    /// Waiting for the chart to load data under the current time
    Stalled,
    Idle,
    Advanced(i64),
}

fn ticks_to_seconds(ticks: i64) -> f64 {
    ticks as f64 / TIME_DIMENSION as f64
}

fn seconds_to_ticks(seconds: f64) -> i64 {
    (seconds * TIME_DIMENSION as f64).round() as i64
}

fn duration_to_ticks(duration: Duration) -> i64 {
    (duration.as_nanos() / 100) as i64
}

/// Keeps the video and chart sinks on one timeline.
///
/// # Examples
///
/// ```rust
/// use edfstream::{ManualClock, PlaybackMode, TimelineConfig, TimelineController, TIME_DIMENSION};
///
/// let start = 1_000 * TIME_DIMENSION;
/// let mut timeline = TimelineController::with_clock(TimelineConfig::default(), ManualClock::new(start));
/// timeline.open_session(start, Some(start + 60 * TIME_DIMENSION));
///
/// // Nothing to show the time on yet
/// assert_eq!(timeline.set_current_time(start + TIME_DIMENSION), None);
///
/// let restore = timeline.start_navigation(edfstream::Driver::Chart);
/// assert!(timeline.mode().contains(PlaybackMode::SUSPENDED));
/// timeline.restore(restore);
/// assert_eq!(timeline.mode(), PlaybackMode::NONE);
/// ```
pub struct TimelineController {
    mode: PlaybackMode,
    active: Option<Driver>,
    pending_resume: Option<PlaybackMode>,
    start_time: i64,
    finish_time: Option<i64>,
    current_time: i64,
    tick_interval: Duration,
    video: Option<Box<dyn VideoSink>>,
    chart: Option<Box<dyn ChartSink>>,
    clock: Box<dyn Clock>,
}

impl TimelineController {
    pub fn new(config: TimelineConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }

    pub fn with_clock(config: TimelineConfig, clock: impl Clock + 'static) -> Self {
        TimelineController {
            mode: PlaybackMode::NONE,
            active: None,
            pending_resume: None,
            start_time: 0,
            finish_time: None,
            current_time: 0,
            tick_interval: config.tick_interval(),
            video: None,
            chart: None,
            clock: Box::new(clock),
        }
    }

    /// Points the timeline at a session; `finish == None` means still live
    pub fn open_session(&mut self, start: i64, finish: Option<i64>) {
        info!("timeline opened at {} (live: {})", start, finish.is_none());
        self.start_time = start;
        self.finish_time = finish.map(|f| f.max(start));
        self.current_time = start;
        self.pending_resume = None;
        self.push_range();
    }

    /// Marks a live session as completed at `finish`
    pub fn close_session(&mut self, finish: i64) {
        self.finish_time = Some(finish.max(self.start_time));
        self.current_time = self.clamp(self.current_time);
        self.push_range();
    }

    pub fn set_video_sink(&mut self, video: impl VideoSink + 'static) {
        self.video = Some(Box::new(video));
    }

    pub fn remove_video_sink(&mut self) -> Option<Box<dyn VideoSink>> {
        self.drop_driver(Driver::Video);
        self.video.take()
    }

    pub fn set_chart_sink(&mut self, chart: impl ChartSink + 'static) {
        self.chart = Some(Box::new(chart));
        self.push_range();
    }

    pub fn remove_chart_sink(&mut self) -> Option<Box<dyn ChartSink>> {
        self.drop_driver(Driver::Chart);
        self.chart.take()
    }

    /// Clears a driver from the mode and from a stalled resume
    fn drop_driver(&mut self, driver: Driver) {
        if self.active == Some(driver) {
            self.active = None;
        }
        self.mode.remove(driver.mode());
        if let Some(pending) = self.pending_resume.as_mut() {
            pending.remove(driver.mode());
            if pending.is_empty() {
                self.pending_resume = None;
            }
        }
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn active_source(&self) -> Option<Driver> {
        self.active
    }

    pub fn is_suspended(&self) -> bool {
        self.mode.contains(PlaybackMode::SUSPENDED)
    }

    /// True while playback waits for data to load
    pub fn is_stalled(&self) -> bool {
        self.pending_resume.is_some()
    }

    pub fn is_live(&self) -> bool {
        self.finish_time.is_none()
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    /// Stored finish, or now for a live session
    pub fn finish_time(&self) -> i64 {
        self.finish_time
            .unwrap_or_else(|| self.clock.now())
            .max(self.start_time)
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.finish_time())
    }

    /// Absolute current time in ticks
    pub fn current_time(&self) -> i64 {
        self.current_time
    }

    pub fn current_offset(&self) -> i64 {
        self.current_time - self.start_time
    }

    /// Hands time to `driver`. Playback starts once nothing holds it suspended.
    pub fn play(&mut self, driver: Driver) {
        self.pending_resume = None;
        self.mode.remove(PlaybackMode::DRIVERS);
        self.mode.insert(driver.mode());
        self.active = Some(driver);
        debug!("play: {:?}", self.mode);
        self.resume_if_driving();
    }

    pub fn pause(&mut self) {
        self.pending_resume = None;
        self.mode.remove(PlaybackMode::DRIVERS);
        self.pause_video();
    }

    /// Suspends playback while `source` takes exclusive control, e.g. while
    /// the user drags one of the views.
    pub fn start_navigation(&mut self, source: Driver) -> Restore {
        self.pause_video();

        let set = if self.mode.contains(PlaybackMode::SUSPENDED) {
            PlaybackMode::NONE
        } else {
            PlaybackMode::SUSPENDED
        };
        self.mode ^= set;
        let previous = self.active.replace(source);
        debug!("navigation by {:?}, previous {:?}", source, previous);
        Restore { previous, set }
    }

    /// Undoes one [`start_navigation`](Self::start_navigation)
    pub fn restore(&mut self, token: Restore) {
        // only the bit this token set
        self.mode ^= token.set;
        self.active = token.previous;
        self.resume_if_driving();
    }

    /// Seeks both sinks to `time`, clamped into the session.
    ///
    /// Returns the applied time, or `None` when no sink is registered.
    pub fn set_current_time(&mut self, time: i64) -> Option<i64> {
        if self.video.is_none() && self.chart.is_none() {
            debug!("set_current_time ignored: no sink registered");
            return None;
        }

        let restore = self.start_navigation(self.active.unwrap_or(Driver::Chart));

        let clamped = self.clamp(time);
        if clamped != time {
            debug!("time {} clamped to {}", time, clamped);
        }
        self.current_time = clamped;
        let offset = self.current_offset();
        let range = self.time_range();

        if let Some(video) = self.video.as_mut() {
            video.set_current_time(ticks_to_seconds(offset));
        }
        if let Some(chart) = self.chart.as_mut() {
            chart.set_time_range(range);
            chart.set_current_time(offset);
        }

        self.check_readiness();
        self.restore(restore);
        Some(clamped)
    }

    /// Change reported by the driving view, as an offset in ticks
    pub fn on_change_current_time(&mut self, offset: i64) {
        self.current_time = self.clamp(self.start_time + offset);
        self.forward_to_video();
    }

    /// One synchronization step
    pub fn tick(&mut self) -> TickOutcome {
        if self.is_suspended() {
            return TickOutcome::Suspended;
        }
        if self.pending_resume.is_some() && !self.check_readiness() {
            return TickOutcome::Stalled;
        }

        match self.mode.driver() {
            Some(Driver::Video) => {
                let seconds = match self.video.as_ref() {
                    Some(video) if video.is_ready() => video.current_time(),
                    _ => return TickOutcome::Idle,
                };
                self.current_time = self.clamp(self.start_time + seconds_to_ticks(seconds));
                let offset = self.current_offset();
                if let Some(chart) = self.chart.as_mut() {
                    chart.set_current_time(offset);
                }
            }
            Some(Driver::Chart) => {
                let next = self.clamp(self.current_time + duration_to_ticks(self.tick_interval));
                let delta = next - self.current_time;
                if delta == 0 && !self.is_live() {
                    info!("end of session reached");
                    self.pause();
                    return TickOutcome::Idle;
                }
                if let Some(chart) = self.chart.as_mut() {
                    chart.shift_current_time(delta);
                }
                self.current_time = next;
                self.forward_to_video();
            }
            None => return TickOutcome::Idle,
        }

        if self.check_readiness() {
            TickOutcome::Advanced(self.current_time)
        } else {
            TickOutcome::Stalled
        }
    }

    fn clamp(&self, time: i64) -> i64 {
        time.clamp(self.start_time, self.finish_time())
    }

    fn push_range(&mut self) {
        let range = self.time_range();
        let offset = self.current_offset();
        if let Some(chart) = self.chart.as_mut() {
            chart.set_time_range(range);
            chart.set_current_time(offset);
        }
    }

    fn forward_to_video(&mut self) {
        let offset = self.current_offset();
        if let Some(video) = self.video.as_mut() {
            // a playing video is the one reporting this time
            if !video.is_playing() {
                video.set_current_time(ticks_to_seconds(offset));
            }
        }
    }

    fn pause_video(&mut self) {
        if let Some(video) = self.video.as_mut() {
            if video.is_playing() {
                video.pause();
            }
        }
    }

    fn resume_if_driving(&mut self) {
        if self.is_suspended() || self.pending_resume.is_some() {
            return;
        }
        if self.mode.contains(PlaybackMode::DRIVEN_BY_VIDEO) {
            if let Some(video) = self.video.as_mut() {
                if !video.is_playing() {
                    video.play();
                }
            }
        }
    }

    /// Stalls playback while the chart is not ready and resumes a stalled
    /// playback on the first ready check. Returns the chart readiness.
    fn check_readiness(&mut self) -> bool {
        let ready = self
            .chart
            .as_ref()
            .map_or(true, |chart| chart.ready_for_playback());

        if ready {
            if let Some(drivers) = self.pending_resume.take() {
                info!("data caught up, resuming {:?}", drivers);
                self.mode.insert(drivers);
                self.resume_if_driving();
            }
        } else if self.mode.intersects(PlaybackMode::DRIVERS) {
            debug!("chart not ready at offset {}, stalling", self.current_offset());
            self.pending_resume = Some(self.mode & PlaybackMode::DRIVERS);
            self.mode.remove(PlaybackMode::DRIVERS);
            self.pause_video();
        }
        ready
    }
}

/// Runs [`TimelineController::tick`] every tick interval on a [`Scheduler`].
///
/// A tick that finds the controller already borrowed is skipped. Dropping
/// the loop stops it.
pub struct SyncLoop {
    running: Rc<Cell<bool>>,
}

impl SyncLoop {
    pub fn start(controller: &Rc<RefCell<TimelineController>>, scheduler: Rc<dyn Scheduler>) -> SyncLoop {
        let interval = controller.borrow().tick_interval();
        let running = Rc::new(Cell::new(true));
        schedule_tick(Rc::downgrade(controller), scheduler, interval, running.clone());
        SyncLoop { running }
    }

    pub fn stop(&self) {
        self.running.set(false);
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }
}

impl Drop for SyncLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn schedule_tick(
    controller: Weak<RefCell<TimelineController>>,
    scheduler: Rc<dyn Scheduler>,
    interval: Duration,
    running: Rc<Cell<bool>>,
) {
    let next = scheduler.clone();
    scheduler.schedule_after(
        interval,
        Box::new(move || {
            if !running.get() {
                return;
            }
            let strong = match controller.upgrade() {
                Some(strong) => strong,
                None => return,
            };
            match strong.try_borrow_mut() {
                Ok(mut timeline) => {
                    timeline.tick();
                }
                Err(_) => debug!("timeline busy, tick skipped"),
            }
            drop(strong);
            schedule_tick(controller, next, interval, running);
        }),
    );
}
