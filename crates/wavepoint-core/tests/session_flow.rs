//! Whole-session flows against an in-process agent: notifications go in
//! through a shared inbox, commands come out through a shared sink, and
//! regions live in `MemorySharedMemory`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;

use tempfile::TempDir;
use wavepoint_common::protocol::{
    CommandPacket, CommandTag, Notification, PredispatchState, COMMAND_PACKET_SIZE,
};
use wavepoint_common::{
    encode_loadmap, DeviceDescriptor, MomentaryBreakpoint, SegmentDescriptor, WaveDim3, WaveInfo,
    WAVE_LANES,
};
use wavepoint_core::dbginfo::{BinaryFormat, DbgInfoError};
use wavepoint_core::dwarf::{LineRow, LineTable};
use wavepoint_core::shm::write_binary_image;
use wavepoint_core::{
    AgentCommandChannel, DebugInfoBackend, DebugInfoSession, Error, FocusChange, GpuDebugSession,
    HostDebugger, MemorySharedMemory, NotificationReader, ReadOutcome, Region, Resolution,
    SessionConfig, SharedMemory, StandaloneHost, StepKind, StopReport,
};

const KERNEL_TEXT: &str = "kernel void vadd()\n{\n  a = 1;\n  b = 2; c = 3;\n\n  d = 4;\n}\n";
const SEGMENT_BASE: u64 = 0x10000;

/// Line table served for every image; images starting with `b"plain"` have
/// no high-level section
struct TableBackend;

fn rows() -> Vec<LineRow> {
    let elf = Some("hsa::self().elf".to_string());
    [(0x100, 3), (0x108, 4), (0x110, 4), (0x120, 6)]
        .into_iter()
        .map(|(address, line)| LineRow {
            address,
            line,
            file: elf.clone(),
        })
        .collect()
}

impl DebugInfoBackend for TableBackend {
    fn open(
        &self,
        image: &[u8],
        format: BinaryFormat,
    ) -> Result<Box<dyn DebugInfoSession>, DbgInfoError> {
        if image.starts_with(b"junk") {
            return Err(DbgInfoError::NoDebugInfo);
        }
        match format {
            BinaryFormat::TwoLevel if image.starts_with(b"plain") => {
                Err(DbgInfoError::NoHighLevelBinary)
            }
            BinaryFormat::TwoLevel => Ok(Box::new(LineTable::new(
                rows(),
                Some(KERNEL_TEXT.to_string()),
            ))),
            BinaryFormat::SingleLevel => Ok(Box::new(LineTable::new(rows(), None))),
        }
    }
}

#[derive(Clone, Default)]
struct Sink(Rc<RefCell<Vec<u8>>>);

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Sink {
    fn packets(&self) -> Vec<CommandPacket> {
        self.0
            .borrow()
            .chunks(COMMAND_PACKET_SIZE)
            .map(|chunk| CommandPacket::decode(chunk).unwrap())
            .collect()
    }

    fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

/// Non-blocking pipe stand-in: empty means would-block
#[derive(Clone, Default)]
struct Inbox(Rc<RefCell<VecDeque<u8>>>);

impl Read for Inbox {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut queue = self.0.borrow_mut();
        if queue.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "empty"));
        }
        let n = buf.len().min(queue.len());
        for (slot, byte) in buf.iter_mut().zip(queue.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Inbox {
    fn push(&self, notification: &Notification) {
        self.push_raw(&notification.encode());
    }

    fn push_raw(&self, bytes: &[u8]) {
        self.0.borrow_mut().extend(bytes.iter().copied());
    }
}

struct Rig {
    session: GpuDebugSession,
    host: StandaloneHost,
    shm: MemorySharedMemory,
    sink: Sink,
    inbox: Inbox,
    dir: TempDir,
}

impl Rig {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SessionConfig::default();
        config.source_dump_path = dir.path().join("temp_source");
        config.isa.agent_isa_path = dir.path().join("agent_isa.txt");
        config.isa.dump_path = dir.path().join("temp_isa");

        let shm = MemorySharedMemory::new();
        let mut session = GpuDebugSession::new(config, Box::new(TableBackend), Box::new(shm.clone()));
        let inbox = Inbox::default();
        session.attach_notifications(NotificationReader::from_reader(Box::new(inbox.clone())));

        Self {
            session,
            host: StandaloneHost::new(),
            shm,
            sink: Sink::default(),
            inbox,
            dir,
        }
    }

    fn open_channel(&mut self) -> usize {
        let channel = AgentCommandChannel::from_writer(Box::new(self.sink.clone()));
        self.session
            .open_command_channel(&mut self.host, channel)
            .unwrap()
    }

    fn breakpoint(&mut self, number: i32, text: &str, condition: Option<&str>) -> Resolution {
        let request = self
            .session
            .parse_breakpoint(number, text, condition)
            .unwrap();
        self.host.add_breakpoint(&request);
        self.session.resolve(&mut self.host, &request).unwrap()
    }

    fn publish_code(&self, image: &[u8], segment_base: u64) {
        write_binary_image(&self.shm, image).unwrap();
        let segment = SegmentDescriptor {
            device: 0,
            executable: 1,
            storage_type: 0,
            storage_base: 0,
            storage_size: 0,
            storage_offset: 0,
            segment_base,
            segment_size: 0x1000,
            segment_base_elf_va: 0,
            is_executed: true,
        };
        self.shm
            .write_region(Region::LoadMap, &encode_loadmap(&[segment]))
            .unwrap();
    }

    fn publish_waves(&mut self, waves: &[WaveInfo]) {
        let table: Vec<u8> = waves.iter().flat_map(WaveInfo::encode).collect();
        self.shm.write_region(Region::WaveInfo, &table).unwrap();
        self.deliver(&Notification::NewActiveWaves {
            count: waves.len() as u32,
        });
    }

    fn new_binary(&mut self) {
        self.deliver(&Notification::NewBinary {
            kernel_name: "vadd".into(),
            work_group_size: WaveDim3::new(64, 1, 1),
            grid_size: WaveDim3::new(256, 1, 1),
        });
    }

    fn deliver(&mut self, notification: &Notification) {
        self.inbox.push(notification);
        // hit lists come back padded to the wire width, so compare tags only
        match self.session.handle_agent_event(&mut self.host).unwrap() {
            ReadOutcome::Packet(received) => assert_eq!(received.tag(), notification.tag()),
            other => panic!("expected a packet, got {:?}", other),
        }
    }
}

fn wave(work_group: WaveDim3, exec_mask: u64, pc: u64) -> WaveInfo {
    WaveInfo {
        work_group,
        work_items: (0..WAVE_LANES as i32).map(|i| WaveDim3::new(i, 0, 0)).collect(),
        exec_mask,
        pc,
        wave_address: 0,
    }
}

#[test]
fn test_buffered_requests_flush_once_agent_ready() {
    let mut rig = Rig::new();
    for (number, text) in [(1, "rocm:vadd"), (2, "rocm:vsub"), (3, "rocm"), (4, "rocm:*")] {
        assert_eq!(rig.breakpoint(number, text, None), Resolution::Buffered);
    }
    assert_eq!(rig.session.pending().len(), 4);

    assert_eq!(rig.open_channel(), 4);
    let packets = rig.sink.packets();
    assert_eq!(packets.len(), 4);
    assert!(packets.iter().all(|p| p.tag == CommandTag::CreateBreakpoint));
    let ids: Vec<i32> = packets.iter().map(|p| p.breakpoint_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert_eq!(packets[2].kernel_name, "*");

    assert!(rig.session.pending().is_empty());
    assert_eq!(rig.session.pending().iter().count(), 0);
}

#[test]
fn test_ready_agent_sends_immediately() {
    let mut rig = Rig::new();
    rig.open_channel();
    assert_eq!(
        rig.breakpoint(7, "rocm:vadd", Some("if wg:1,0,0 wi:3,0,0")),
        Resolution::Sent { pc: None }
    );
    let packet = &rig.sink.packets()[0];
    assert_eq!(packet.kernel_name, "vadd");
    assert_eq!(packet.condition.work_item, WaveDim3::new(3, 0, 0));
    assert!(rig.session.pending().is_empty());
}

#[test]
fn test_source_breakpoint_waits_for_debug_info() {
    let mut rig = Rig::new();
    rig.open_channel();
    assert_eq!(rig.breakpoint(1, "rocm:2", None), Resolution::Buffered);
    assert!(rig.sink.packets().is_empty());

    rig.publish_code(b"code object", SEGMENT_BASE);
    rig.new_binary();

    let packets = rig.sink.packets();
    assert_eq!(packets.len(), 1);
    // line 2 has no code, so the next mapped line is used
    assert_eq!(packets[0].line_num, 3);
    assert_eq!(packets[0].pc, SEGMENT_BASE + 0x100);
    assert_eq!(packets[0].source_line, "a = 1;");

    let bp = rig.host.gpu_breakpoint(1).unwrap();
    assert_eq!(bp.pc, Some(SEGMENT_BASE + 0x100));
    assert_eq!(bp.pc_relative, Some(0x100));
    assert!(rig.host.modified.contains(&1));
    assert!(rig.session.pending().is_empty());

    let kernel = rig.session.kernels().kernel("vadd").unwrap();
    assert_eq!(kernel.launch_count(), 1);
    assert_eq!(
        rig.session.dbginfo().active_file(),
        rig.dir.path().join("temp_source").display().to_string()
    );
}

#[test]
fn test_reload_re_resolves_existing_breakpoints() {
    let mut rig = Rig::new();
    rig.open_channel();
    rig.publish_code(b"code object", SEGMENT_BASE);
    rig.new_binary();
    assert_eq!(
        rig.breakpoint(1, "rocm:4", None),
        Resolution::Sent {
            pc: Some(SEGMENT_BASE + 0x108)
        }
    );
    rig.sink.clear();

    // same kernel, loaded somewhere else
    rig.publish_code(b"code object", 0x40000);
    rig.new_binary();

    let packets = rig.sink.packets();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].breakpoint_id, 1);
    assert_eq!(packets[0].pc, 0x40108);
    assert_eq!(rig.host.gpu_breakpoint(1).unwrap().pc, Some(0x40108));
    assert_eq!(rig.session.kernels().kernel("vadd").unwrap().dispatches[0].count, 2);
}

#[test]
fn test_reload_after_failed_reload_creates_once() {
    let mut rig = Rig::new();
    rig.open_channel();
    rig.publish_code(b"code object", SEGMENT_BASE);
    rig.new_binary();
    rig.breakpoint(1, "rocm:4", None);

    rig.publish_code(b"junk", SEGMENT_BASE);
    rig.new_binary();
    assert_eq!(rig.session.pending().len(), 1);
    rig.sink.clear();

    rig.publish_code(b"code object", 0x40000);
    rig.new_binary();

    let creates: Vec<CommandPacket> = rig
        .sink
        .packets()
        .into_iter()
        .filter(|p| p.tag == CommandTag::CreateBreakpoint)
        .collect();
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].breakpoint_id, 1);
    assert_eq!(creates[0].pc, 0x40108);
    assert!(rig.session.pending().is_empty());
}

#[test]
fn test_unmapped_line_is_reported() {
    let mut rig = Rig::new();
    rig.open_channel();
    rig.publish_code(b"code object", SEGMENT_BASE);
    rig.new_binary();

    assert_eq!(rig.breakpoint(1, "rocm:k.cl:40", None), Resolution::NotMapped);
    assert_eq!(rig.host.notices, vec!["[rocm-gdb: No line 40 in k.cl]"]);
    assert!(rig.sink.packets().is_empty());
}

#[test]
fn test_binary_without_debug_info_degrades() {
    let mut rig = Rig::new();
    rig.open_channel();
    rig.breakpoint(1, "rocm:3", None);
    rig.publish_code(b"junk", SEGMENT_BASE);
    rig.new_binary();

    assert_eq!(
        rig.host.notices,
        vec!["[ROCm-gdb]: The code object for the current dispatch does not contain debug information"]
    );
    assert!(!rig.session.dbginfo().is_available());
    assert_eq!(rig.session.kernels().active_kernel_name(), Some("vadd"));
    assert_eq!(rig.session.pending().len(), 1);
    assert!(rig.sink.packets().is_empty());
}

#[test]
fn test_single_level_binary_uses_line_table_file() {
    let mut rig = Rig::new();
    rig.publish_code(b"plain object", SEGMENT_BASE);
    rig.new_binary();
    assert!(rig.session.dbginfo().is_available());
    assert_eq!(rig.session.dbginfo().active_file(), "hsa::self().elf");
    assert!(!rig.dir.path().join("temp_source").exists());
}

#[test]
fn test_short_read_reported_once() {
    let mut rig = Rig::new();
    rig.inbox.push_raw(&[1, 0, 0, 0, 9, 9, 9, 9, 9, 9]);

    let outcome = rig.session.handle_agent_event(&mut rig.host).unwrap();
    assert_eq!(outcome, ReadOutcome::ShortRead(10));
    assert_eq!(rig.host.notices.len(), 1);

    let outcome = rig.session.handle_agent_event(&mut rig.host).unwrap();
    assert_eq!(outcome, ReadOutcome::Idle);
    assert_eq!(rig.host.notices.len(), 1);
    assert_eq!(rig.session.notification_reader().unwrap().short_reads(), 1);
}

#[test]
fn test_spurious_wakeup_changes_nothing() {
    let mut rig = Rig::new();
    let before = *rig.session.agent();
    assert_eq!(
        rig.session.handle_agent_event(&mut rig.host).unwrap(),
        ReadOutcome::Idle
    );
    assert_eq!(*rig.session.agent(), before);
    assert!(rig.host.notices.is_empty());
    assert!(rig.session.kernels().kernels().is_empty());
}

#[test]
fn test_unknown_notification_does_not_stop_the_loop() {
    let mut rig = Rig::new();
    rig.deliver(&Notification::Unknown(99));
    rig.deliver(&Notification::NewActiveWaves { count: 2 });
    assert_eq!(rig.session.agent().active_waves, 2);
}

#[test]
fn test_breakpoint_hit_overwrites_counts() {
    let mut rig = Rig::new();
    rig.breakpoint(1, "rocm:vadd", None);
    rig.breakpoint(2, "rocm:vsub", None);
    rig.host.modified.clear();

    rig.deliver(&Notification::BreakpointHit {
        ids: vec![1, -1, 9, 2],
        hit_counts: vec![4, 100, 100, 6],
        active_waves: 3,
    });

    assert_eq!(rig.host.gpu_breakpoint(1).unwrap().hit_count, 4);
    assert_eq!(rig.host.gpu_breakpoint(2).unwrap().hit_count, 6);
    assert_eq!(rig.host.modified, vec![1, 2]);
    assert_eq!(rig.session.agent().active_waves, 3);
}

#[test]
fn test_dispatch_lifecycle_notifications() {
    let mut rig = Rig::new();
    rig.publish_code(b"code object", SEGMENT_BASE);
    rig.new_binary();
    rig.deliver(&Notification::Predispatch {
        state: PredispatchState::EnteredPredispatch,
        host_tid: 4242,
    });
    rig.deliver(&Notification::StartDebugThread { tid: 77 });
    rig.deliver(&Notification::BeginDebugging);
    rig.deliver(&Notification::Devices(vec![DeviceDescriptor {
        name: "gfx803".into(),
        chip_id: 0x7300,
        shader_engines: 4,
        compute_units: 64,
        simds_per_cu: 4,
        waves_per_cu: 40,
        engine_clock_mhz: 1000,
        memory_clock_mhz: 500,
        active: true,
    }]));
    rig.publish_waves(&[wave(WaveDim3::ZERO, 0b11, SEGMENT_BASE + 0x100)]);
    rig.deliver(&Notification::FocusChange {
        work_group: WaveDim3::ZERO,
        work_item: WaveDim3::new(1, 0, 0),
    });

    let agent = *rig.session.agent();
    assert!(agent.focus_device);
    assert_eq!(agent.dispatch_host_tid, Some(4242));
    assert_eq!(agent.debug_thread_tid, Some(77));
    assert_eq!(rig.session.devices().active_device().unwrap().name, "gfx803");
    assert_eq!(
        rig.host.notices.last().unwrap(),
        "[ROCm-gdb]: Switching to work-group (0,0,0) and work-item (1,0,0)"
    );

    rig.deliver(&Notification::EndDebugging {
        dispatch_completed: true,
    });
    let agent = *rig.session.agent();
    assert!(!agent.focus_device);
    assert_eq!(agent.active_waves, 0);
    assert!(rig.session.focus().is_unknown());
    assert!(rig.session.devices().active_device().is_none());
    assert!(!rig.session.dbginfo().is_available());
}

#[test]
fn test_agent_error_and_failed_kill_are_shown() {
    let mut rig = Rig::new();
    rig.deliver(&Notification::AgentError { code: 12 });
    rig.deliver(&Notification::KillComplete { successful: false });
    assert_eq!(
        rig.host.notices,
        vec![
            "[ROCm-gdb]: Agent Error: 12",
            "[ROCm-gdb]: Could not kill waves safely"
        ]
    );
    assert_eq!(rig.session.agent().last_agent_error, Some(12));

    rig.deliver(&Notification::NewActiveWaves { count: 5 });
    rig.deliver(&Notification::KillComplete { successful: true });
    assert_eq!(rig.session.agent().active_waves, 0);
}

#[test]
fn test_stop_at_kernel_entry_prefers_named_kernel() {
    let mut rig = Rig::new();
    rig.open_channel();
    rig.breakpoint(1, "rocm", None);
    rig.breakpoint(2, "rocm:vadd", None);
    rig.publish_code(b"code object", SEGMENT_BASE);
    rig.new_binary();
    rig.deliver(&Notification::Predispatch {
        state: PredispatchState::EnteredPredispatch,
        host_tid: 1,
    });

    let report = rig.session.report_stop(&mut rig.host).unwrap().unwrap();
    assert_eq!(
        report,
        StopReport::KernelEntry {
            number: 2,
            kernel: "vadd".into(),
            condition: None
        }
    );
    assert_eq!(
        rig.host.notices.last().unwrap(),
        "[ROCm-gdb]: Breakpoint 2 at GPU Kernel, vadd()"
    );
}

#[test]
fn test_stop_on_conditional_breakpoint_moves_focus() {
    let mut rig = Rig::new();
    rig.open_channel();
    rig.publish_code(b"code object", SEGMENT_BASE);
    rig.new_binary();
    rig.breakpoint(1, "rocm:3", Some("if wg:1,0,0 wi:2,0,0"));

    let pc = SEGMENT_BASE + 0x100;
    rig.publish_waves(&[
        wave(WaveDim3::ZERO, 0b1, pc),
        wave(WaveDim3::new(1, 0, 0), 0b111, pc),
    ]);

    let report = rig.session.report_stop(&mut rig.host).unwrap().unwrap();
    match report {
        StopReport::Breakpoint {
            number,
            ref location,
            ref condition,
        } => {
            assert_eq!(number, 1);
            assert!(location.starts_with("PC:0x10100 a = 1; "), "{}", location);
            assert!(location.ends_with("@line 3"));
            assert_eq!(condition.as_deref(), Some("WG: 1,0,0 and WI: 2,0,0  Active"));
        }
        other => panic!("unexpected report {:?}", other),
    }
    assert_eq!(
        rig.session.focus().current(),
        (WaveDim3::new(1, 0, 0), WaveDim3::new(2, 0, 0))
    );
    assert_eq!(
        rig.host.notices.last().unwrap(),
        "[ROCm-gdb]: Condition: WG: 1,0,0 and WI: 2,0,0  Active"
    );
    assert!(rig
        .host
        .notices
        .iter()
        .any(|n| n == "[ROCm-gdb]: Switching to work-group (1,0,0) and work-item (2,0,0)"));
}

#[test]
fn test_stop_without_breakpoint_reports_source_line() {
    let mut rig = Rig::new();
    rig.publish_code(b"code object", SEGMENT_BASE);
    rig.new_binary();
    rig.publish_waves(&[wave(WaveDim3::new(2, 0, 0), 0b1, SEGMENT_BASE + 0x110)]);

    let report = rig.session.report_stop(&mut rig.host).unwrap().unwrap();
    assert_eq!(
        report,
        StopReport::SourceLine {
            pc: SEGMENT_BASE + 0x110,
            source_line: "b = 2;".into(),
            file: "temp_source".into(),
            line: 4,
        }
    );
    // focus was bootstrapped from the first wave
    assert_eq!(
        rig.session.focus().current(),
        (WaveDim3::new(2, 0, 0), WaveDim3::ZERO)
    );
    let switch = rig
        .host
        .notices
        .iter()
        .position(|n| n == "[ROCm-gdb]: Switching to work-group (2,0,0) and work-item (0,0,0)")
        .expect("focus notice");
    let pc_line = rig
        .host
        .notices
        .iter()
        .position(|n| n.contains("PC:0x10110"))
        .expect("pc notice");
    assert!(switch < pc_line);

    // a second stop on the same wave keeps focus quiet
    rig.host.notices.clear();
    rig.session.report_stop(&mut rig.host).unwrap();
    assert!(!rig.host.notices.iter().any(|n| n.contains("Switching to")));
}

#[test]
fn test_current_pc_without_loaded_code_fails() {
    let mut rig = Rig::new();
    rig.publish_waves(&[wave(WaveDim3::ZERO, 0b1, SEGMENT_BASE + 0x100)]);
    assert!(matches!(rig.session.current_pc(), Err(Error::NoExecutingSegment)));

    rig.publish_code(b"code object", SEGMENT_BASE);
    rig.new_binary();
    assert_eq!(rig.session.current_pc().unwrap(), 0x100);
}

#[test]
fn test_step_over_plants_momentary_breakpoints() {
    let mut rig = Rig::new();
    rig.open_channel();
    rig.publish_code(b"code object", SEGMENT_BASE);
    rig.new_binary();
    rig.publish_waves(&[wave(WaveDim3::ZERO, 0b1, SEGMENT_BASE + 0x100)]);

    let planted = rig
        .session
        .set_step_breakpoints(&mut rig.host, StepKind::Over, 1)
        .unwrap();
    assert_eq!(planted, 3);

    let raw = rig.shm.read_region(Region::MomentaryBreakpoints).unwrap().unwrap();
    let table = MomentaryBreakpoint::decode_table(&raw, planted).unwrap();
    let lines: Vec<u64> = table.iter().map(|m| m.line).collect();
    assert_eq!(lines, vec![4, 4, 6]);
    assert_eq!(table[0].pc, 0x108);

    let packets = rig.sink.packets();
    let tail: Vec<CommandTag> = packets.iter().rev().take(2).map(|p| p.tag).collect();
    assert_eq!(tail, vec![CommandTag::ContinueDispatch, CommandTag::MomentaryBreakpoint]);
    assert_eq!(packets[packets.len() - 2].momentary_count, 3);
}

#[test]
fn test_step_over_before_any_wave_steps_in() {
    let mut rig = Rig::new();
    rig.open_channel();
    rig.publish_code(b"code object", SEGMENT_BASE);
    rig.new_binary();

    let planted = rig
        .session
        .set_step_breakpoints(&mut rig.host, StepKind::Over, 3)
        .unwrap();
    assert_eq!(planted, 4);
    assert_eq!(rig.host.notices.len(), 1);
}

#[test]
fn test_step_without_debug_info_is_refused() {
    let mut rig = Rig::new();
    rig.open_channel();
    let planted = rig
        .session
        .set_step_breakpoints(&mut rig.host, StepKind::In, 1)
        .unwrap();
    assert_eq!(planted, 0);
    assert_eq!(
        rig.host.notices,
        vec!["[ROCm-gdb]: could not perform GPU step"]
    );
    assert!(rig.sink.packets().is_empty());
}

#[test]
fn test_delete_before_and_after_agent_ready() {
    let mut rig = Rig::new();
    rig.breakpoint(1, "rocm:vadd", None);
    rig.session.delete_breakpoint(1).unwrap();
    assert!(rig.session.pending().is_empty());

    rig.open_channel();
    assert!(rig.sink.packets().is_empty());
    rig.breakpoint(2, "rocm:vadd", None);
    rig.session.delete_breakpoint(2).unwrap();
    rig.session.disable_breakpoint(&mut rig.host, 2).unwrap();

    let tags: Vec<CommandTag> = rig.sink.packets().iter().map(|p| p.tag).collect();
    assert_eq!(
        tags,
        vec![
            CommandTag::CreateBreakpoint,
            CommandTag::DeleteBreakpoint,
            CommandTag::DisableBreakpoint
        ]
    );
    assert!(!rig.host.gpu_breakpoint(2).unwrap().enabled);
}

#[test]
fn test_deleted_buffered_breakpoint_is_never_created() {
    let mut rig = Rig::new();
    rig.open_channel();
    assert_eq!(rig.breakpoint(1, "rocm:3", None), Resolution::Buffered);
    rig.session.delete_breakpoint(1).unwrap();
    assert!(rig.session.pending().is_empty());

    rig.publish_code(b"code object", SEGMENT_BASE);
    rig.new_binary();

    let tags: Vec<CommandTag> = rig.sink.packets().iter().map(|p| p.tag).collect();
    assert_eq!(tags, vec![CommandTag::DeleteBreakpoint]);
}

#[test]
fn test_focus_switch_command_round_trip() {
    let mut rig = Rig::new();
    rig.publish_waves(&[wave(WaveDim3::new(0, 1, 0), 0b1010, 0)]);

    let change = rig
        .session
        .switch_focus(&mut rig.host, "wg:0,1,0 wi:3,0,0")
        .unwrap();
    assert_eq!(change, FocusChange::Bootstrapped);
    assert_eq!(rig.host.expressions, vec!["SetHsailThreadCmdInfo(0,1,0,3,0,0)"]);

    let change = rig
        .session
        .switch_focus(&mut rig.host, "wg:0,1,0 wi:1,0,0")
        .unwrap();
    assert_eq!(change, FocusChange::Changed);
}

#[test]
fn test_close_and_cleanup() {
    let mut rig = Rig::new();
    rig.breakpoint(1, "rocm:vadd", None);
    rig.publish_code(b"code object", SEGMENT_BASE);
    rig.new_binary();

    rig.session.final_cleanup();
    assert!(rig.session.kernels().kernels().is_empty());

    rig.session.close();
    for region in Region::ALL {
        assert!(!rig.shm.contains(region));
    }
    assert!(rig.session.segments().segments().is_empty());
    assert!(rig.session.notification_reader().is_none());
}
