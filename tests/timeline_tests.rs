use std::cell::RefCell;
use std::rc::Rc;

use edfstream::{
    ChartSink, Driver, ManualClock, PlaybackMode, TickOutcome, TimeRange, TimelineConfig, TimelineController,
    VideoSink, TIME_DIMENSION,
};

const START: i64 = 1_700_000_000 * TIME_DIMENSION;
const FINISH: i64 = START + 600 * TIME_DIMENSION;

#[derive(Debug, Default)]
struct FakeVideo {
    time: f64,
    playing: bool,
    ready: bool,
    seeks: Vec<f64>,
    play_calls: usize,
}

impl VideoSink for FakeVideo {
    fn current_time(&self) -> f64 {
        self.time
    }
    fn set_current_time(&mut self, seconds: f64) {
        self.time = seconds;
        self.seeks.push(seconds);
    }
    fn is_playing(&self) -> bool {
        self.playing
    }
    fn is_ready(&self) -> bool {
        self.ready
    }
    fn play(&mut self) {
        self.playing = true;
        self.play_calls += 1;
    }
    fn pause(&mut self) {
        self.playing = false;
    }
}

#[derive(Debug, Default)]
struct FakeChart {
    offset: i64,
    range: Option<TimeRange>,
    ready: bool,
    shifts: usize,
}

impl ChartSink for FakeChart {
    fn current_time(&self) -> i64 {
        self.offset
    }
    fn set_current_time(&mut self, offset: i64) {
        self.offset = offset;
    }
    fn shift_current_time(&mut self, delta: i64) {
        self.offset += delta;
        self.shifts += 1;
    }
    fn ready_for_playback(&self) -> bool {
        self.ready
    }
    fn set_time_range(&mut self, range: TimeRange) {
        self.range = Some(range);
    }
}

struct Fixture {
    timeline: TimelineController,
    video: Rc<RefCell<FakeVideo>>,
    chart: Rc<RefCell<FakeChart>>,
    clock: ManualClock,
}

fn fixture(finish: Option<i64>) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();

    let clock = ManualClock::new(START + 60 * TIME_DIMENSION);
    let mut timeline = TimelineController::with_clock(TimelineConfig::default(), clock.clone());
    timeline.open_session(START, finish);

    let video = Rc::new(RefCell::new(FakeVideo {
        ready: true,
        ..FakeVideo::default()
    }));
    let chart = Rc::new(RefCell::new(FakeChart {
        ready: true,
        ..FakeChart::default()
    }));
    timeline.set_video_sink(video.clone());
    timeline.set_chart_sink(chart.clone());

    Fixture {
        timeline,
        video,
        chart,
        clock,
    }
}

#[test]
fn test_set_current_time_clamps_to_session() {
    let Fixture {
        mut timeline,
        video,
        chart,
        ..
    } = fixture(Some(FINISH));

    assert_eq!(timeline.set_current_time(START - 1000), Some(START));
    assert_eq!(timeline.current_time(), START);
    assert_eq!(chart.borrow().offset, 0);
    assert_eq!(video.borrow().time, 0.0);

    assert_eq!(timeline.set_current_time(FINISH + 1000), Some(FINISH));
    assert_eq!(timeline.current_time(), FINISH);
    assert_eq!(chart.borrow().offset, FINISH - START);
    assert_eq!(video.borrow().time, 600.0);
    assert_eq!(chart.borrow().range, Some(TimeRange::new(START, FINISH)));

    let inside = START + 42 * TIME_DIMENSION;
    assert_eq!(timeline.set_current_time(inside), Some(inside));
    assert_eq!(video.borrow().time, 42.0);
}

#[test]
fn test_live_session_finish_is_now() {
    let Fixture {
        mut timeline,
        chart,
        clock,
        ..
    } = fixture(None);

    assert!(timeline.is_live());
    assert_eq!(timeline.finish_time(), START + 60 * TIME_DIMENSION);
    assert_eq!(timeline.set_current_time(FINISH), Some(START + 60 * TIME_DIMENSION));

    clock.advance(30 * TIME_DIMENSION);
    assert_eq!(timeline.set_current_time(FINISH), Some(START + 90 * TIME_DIMENSION));
    assert_eq!(chart.borrow().range, Some(TimeRange::new(START, START + 90 * TIME_DIMENSION)));
}

#[test]
fn test_set_time_without_sinks_is_noop() {
    let mut timeline = TimelineController::with_clock(TimelineConfig::default(), ManualClock::new(START));
    timeline.open_session(START, Some(FINISH));
    assert_eq!(timeline.set_current_time(START + TIME_DIMENSION), None);
    assert_eq!(timeline.current_time(), START);
}

#[test]
fn test_nested_navigation_restores_exact_state() {
    let Fixture {
        mut timeline,
        video,
        ..
    } = fixture(Some(FINISH));

    timeline.play(Driver::Video);
    assert!(video.borrow().playing);
    let before = timeline.mode();
    assert_eq!(before, PlaybackMode::DRIVEN_BY_VIDEO);

    let outer = timeline.start_navigation(Driver::Chart);
    assert!(!video.borrow().playing);
    let inner = timeline.start_navigation(Driver::Chart);
    assert!(outer.suspended_here());
    assert!(!inner.suspended_here());

    timeline.restore(inner);
    // 内层恢复不能清除外层设置的挂起位
    assert!(timeline.is_suspended());
    assert!(!video.borrow().playing);

    timeline.restore(outer);
    assert_eq!(timeline.mode(), before);
    assert_eq!(timeline.active_source(), Some(Driver::Video));
    assert!(video.borrow().playing);
}

#[test]
fn test_navigation_while_already_suspended_keeps_flag() {
    let Fixture { mut timeline, .. } = fixture(Some(FINISH));

    let first = timeline.start_navigation(Driver::Video);
    let before = timeline.mode();
    assert_eq!(before, PlaybackMode::SUSPENDED);

    let second = timeline.start_navigation(Driver::Chart);
    timeline.restore(second);
    assert_eq!(timeline.mode(), before);
    assert_eq!(timeline.active_source(), Some(Driver::Video));

    timeline.restore(first);
    assert_eq!(timeline.mode(), PlaybackMode::NONE);
    assert_eq!(timeline.active_source(), None);
}

#[test]
fn test_readiness_gating_resumes_once() {
    let Fixture {
        mut timeline,
        chart,
        ..
    } = fixture(Some(FINISH));

    timeline.play(Driver::Chart);
    chart.borrow_mut().ready = false;
    timeline.set_current_time(START + 10 * TIME_DIMENSION);

    assert!(timeline.is_stalled());
    assert!(!timeline.is_suspended());
    assert_eq!(timeline.mode(), PlaybackMode::NONE);

    // 数据未到，时间不前进
    assert_eq!(timeline.tick(), TickOutcome::Stalled);
    assert_eq!(timeline.tick(), TickOutcome::Stalled);
    assert_eq!(chart.borrow().shifts, 0);

    chart.borrow_mut().ready = true;
    let step = timeline.tick_interval().as_nanos() as i64 / 100;
    assert_eq!(timeline.tick(), TickOutcome::Advanced(START + 10 * TIME_DIMENSION + step));
    assert!(!timeline.is_stalled());
    assert_eq!(timeline.mode(), PlaybackMode::DRIVEN_BY_CHART);

    timeline.pause();
    chart.borrow_mut().ready = false;
    chart.borrow_mut().ready = true;
    assert_eq!(timeline.tick(), TickOutcome::Idle);
    assert_eq!(timeline.mode(), PlaybackMode::NONE);
}

#[test]
fn test_video_stalls_until_chart_catches_up() {
    let Fixture {
        mut timeline,
        video,
        chart,
        ..
    } = fixture(Some(FINISH));

    timeline.play(Driver::Video);
    assert_eq!(video.borrow().play_calls, 1);

    video.borrow_mut().time = 12.5;
    chart.borrow_mut().ready = false;
    assert_eq!(timeline.tick(), TickOutcome::Stalled);
    assert_eq!(chart.borrow().offset, 125 * TIME_DIMENSION / 10);
    assert!(!video.borrow().playing);

    assert_eq!(timeline.tick(), TickOutcome::Stalled);
    chart.borrow_mut().ready = true;
    assert!(matches!(timeline.tick(), TickOutcome::Advanced(_)));
    assert!(video.borrow().playing);

    assert!(matches!(timeline.tick(), TickOutcome::Advanced(_)));
    assert_eq!(video.borrow().play_calls, 2);
}

#[test]
fn test_video_driven_tick_copies_time_to_chart() {
    let Fixture {
        mut timeline,
        video,
        chart,
        ..
    } = fixture(Some(FINISH));

    timeline.play(Driver::Video);
    video.borrow_mut().time = 3.5;
    assert_eq!(timeline.tick(), TickOutcome::Advanced(START + 35 * TIME_DIMENSION / 10));
    assert_eq!(chart.borrow().offset, 35 * TIME_DIMENSION / 10);

    // 视频尚未就绪时不同步
    video.borrow_mut().ready = false;
    video.borrow_mut().time = 9.0;
    assert_eq!(timeline.tick(), TickOutcome::Idle);
    assert_eq!(chart.borrow().offset, 35 * TIME_DIMENSION / 10);
}

#[test]
fn test_playing_video_is_not_reseeked_by_its_own_time() {
    let Fixture {
        mut timeline,
        video,
        ..
    } = fixture(Some(FINISH));

    timeline.play(Driver::Video);
    let seeks_before = video.borrow().seeks.len();
    timeline.on_change_current_time(5 * TIME_DIMENSION);
    assert_eq!(video.borrow().seeks.len(), seeks_before);
    assert_eq!(timeline.current_time(), START + 5 * TIME_DIMENSION);

    timeline.pause();
    timeline.on_change_current_time(7 * TIME_DIMENSION);
    assert_eq!(video.borrow().seeks.last(), Some(&7.0));
}

#[test]
fn test_chart_driven_playback_moves_paused_video() {
    let Fixture {
        mut timeline,
        video,
        chart,
        ..
    } = fixture(Some(FINISH));

    timeline.play(Driver::Chart);
    for _ in 0..10 {
        assert!(matches!(timeline.tick(), TickOutcome::Advanced(_)));
    }
    assert_eq!(chart.borrow().shifts, 10);
    assert_eq!(timeline.current_offset(), TIME_DIMENSION);
    assert_eq!(video.borrow().time, 1.0);
    assert!(!video.borrow().playing);
}

#[test]
fn test_closing_live_session_and_removing_sinks() {
    let Fixture {
        mut timeline,
        chart,
        ..
    } = fixture(None);

    timeline.set_current_time(START + 50 * TIME_DIMENSION);
    timeline.close_session(START + 20 * TIME_DIMENSION);
    assert!(!timeline.is_live());
    assert_eq!(timeline.current_time(), START + 20 * TIME_DIMENSION);
    assert_eq!(chart.borrow().offset, 20 * TIME_DIMENSION);

    timeline.play(Driver::Chart);
    assert!(timeline.remove_chart_sink().is_some());
    assert!(timeline.remove_video_sink().is_some());
    assert_eq!(timeline.mode(), PlaybackMode::NONE);
    assert_eq!(timeline.set_current_time(START), None);
}

#[test]
fn test_removed_video_does_not_resume_from_stall() {
    let Fixture {
        mut timeline,
        chart,
        ..
    } = fixture(Some(FINISH));

    timeline.play(Driver::Video);
    chart.borrow_mut().ready = false;
    assert_eq!(timeline.tick(), TickOutcome::Stalled);
    assert!(timeline.is_stalled());

    // 停顿期间移除视频，等待恢复的驱动位也要一并清除
    assert!(timeline.remove_video_sink().is_some());
    assert!(!timeline.is_stalled());
    assert_eq!(timeline.active_source(), None);

    chart.borrow_mut().ready = true;
    assert_eq!(timeline.tick(), TickOutcome::Idle);
    assert_eq!(timeline.mode(), PlaybackMode::NONE);

    timeline.play(Driver::Chart);
    assert!(matches!(timeline.tick(), TickOutcome::Advanced(_)));
}
