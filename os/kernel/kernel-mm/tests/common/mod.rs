//! A fake kernel around the memory manager: a process table, executables on
//! an in-memory disk, and a record of processes killed by faults.

#![allow(dead_code)]

use kernel_info::layout::MemoryLayout;
use kernel_info::memory::{BLOCK_SIZE, TASK_SIZE};
use kernel_memory_addresses::VirtualAddress;
use kernel_mm::env::{
    Block, BlockDevice, BlockError, BlockNumber, DeviceId, ExecutableId, ImageStore, ProcessImage,
    ProcessTable,
};
use kernel_mm::{MemoryManager, MmConfig, MmError};
use kernel_vmem::AddressSpace;
use std::collections::{BTreeMap, HashMap};

pub type Pid = usize;

pub const DEVICE: DeviceId = 0x0301;

/// 4 MiB of RAM: 768 frames above `LOW_MEM`.
pub fn config() -> MmConfig {
    MmConfig::new(MemoryLayout::new(0x0040_0000))
}

pub fn manager() -> MemoryManager {
    MemoryManager::new(config()).unwrap()
}

/// Image contents: recognizable and never zero.
pub fn image_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 + 1).collect()
}

/// Linear base of a process' task slot.
pub fn slot(pid: Pid) -> VirtualAddress {
    VirtualAddress::new(pid as u32 * TASK_SIZE)
}

#[derive(Debug, Clone, Copy)]
pub struct Process {
    pub space: AddressSpace,
    pub image: ProcessImage,
}

pub struct Executable {
    /// Physical block of each logical block, `0` for holes.
    pub blocks: Vec<BlockNumber>,
    pub open_count: usize,
}

#[derive(Default)]
pub struct FakeKernel {
    pub current: Pid,
    pub processes: BTreeMap<Pid, Process>,
    pub executables: HashMap<ExecutableId, Executable>,
    pub disk: HashMap<BlockNumber, Block>,
    /// Every block read, in order.
    pub reads: Vec<BlockNumber>,
    pub failing_block: Option<BlockNumber>,
    pub killed: Vec<(Pid, MmError)>,
    next_block: BlockNumber,
}

impl FakeKernel {
    pub fn new() -> Self {
        Self {
            next_block: 100,
            ..Self::default()
        }
    }

    /// Store an executable: a header block followed by `contents`. Logical
    /// blocks listed in `holes` are left unallocated.
    pub fn install_executable(&mut self, id: u32, contents: &[u8], holes: &[u32]) -> ExecutableId {
        let id = ExecutableId(id);
        let mut blocks = vec![self.store_block(&[0xEE; 32])];
        for (n, chunk) in contents.chunks(BLOCK_SIZE as usize).enumerate() {
            let logical = n as u32 + 1;
            if holes.contains(&logical) {
                blocks.push(0);
            } else {
                blocks.push(self.store_block(chunk));
            }
        }
        self.executables.insert(id, Executable { blocks, open_count: 0 });
        id
    }

    fn store_block(&mut self, bytes: &[u8]) -> BlockNumber {
        let number = self.next_block;
        self.next_block += 1;
        let mut block = [0; BLOCK_SIZE as usize];
        block[..bytes.len()].copy_from_slice(bytes);
        self.disk.insert(number, block);
        number
    }

    /// Physical block of logical block `block`.
    pub fn block_of(&self, executable: ExecutableId, block: u32) -> BlockNumber {
        self.bmap(executable, block)
    }

    /// Start `pid` in an empty address space at its own task slot.
    pub fn spawn(&mut self, mm: &mut MemoryManager, pid: Pid, executable: Option<ExecutableId>, end_data: u32) -> AddressSpace {
        let space = mm.create_address_space(None, slot(pid), TASK_SIZE).unwrap();
        if let Some(executable) = executable {
            self.executables.get_mut(&executable).unwrap().open_count += 1;
        }
        let image = ProcessImage {
            executable,
            start_code: slot(pid),
            end_code: end_data,
            end_data,
            brk: end_data,
        };
        self.processes.insert(pid, Process { space, image });
        space
    }

    /// Fork `parent` into `child`. The child keeps the parent's linear range.
    pub fn fork(&mut self, mm: &mut MemoryManager, parent: Pid, child: Pid) -> Result<AddressSpace, MmError> {
        let Process { space, image } = self.processes[&parent];
        let space = mm.create_address_space(Some(space), image.start_code, TASK_SIZE)?;
        if let Some(executable) = image.executable {
            self.executables.get_mut(&executable).unwrap().open_count += 1;
        }
        self.processes.insert(child, Process { space, image });
        Ok(space)
    }

    pub fn exit(&mut self, mm: &mut MemoryManager, pid: Pid) {
        let Process { space, image } = self.processes.remove(&pid).unwrap();
        mm.destroy_address_space(space, image.start_code, TASK_SIZE);
        if let Some(executable) = image.executable {
            self.executables.get_mut(&executable).unwrap().open_count -= 1;
        }
    }

    pub fn run(&mut self, pid: Pid) -> &mut Self {
        self.current = pid;
        self
    }

    pub fn space(&self, pid: Pid) -> AddressSpace {
        self.processes[&pid].space
    }

    pub fn spaces(&self) -> Vec<AddressSpace> {
        self.processes.values().map(|p| p.space).collect()
    }

    /// Linear address of image offset `offset` in `pid`.
    pub fn at(&self, pid: Pid, offset: u32) -> VirtualAddress {
        self.processes[&pid].image.start_code + offset
    }
}

impl ProcessTable for FakeKernel {
    type Pid = Pid;

    fn current(&self) -> Pid {
        self.current
    }

    fn processes(&self) -> impl Iterator<Item = Pid> + '_ {
        self.processes.keys().rev().copied()
    }

    fn address_space(&self, pid: Pid) -> Option<AddressSpace> {
        self.processes.get(&pid).map(|p| p.space)
    }

    fn image(&self, pid: Pid) -> Option<ProcessImage> {
        self.processes.get(&pid).map(|p| p.image)
    }

    fn terminate_with_fault(&mut self, pid: Pid, error: MmError) {
        self.killed.push((pid, error));
    }
}

impl ImageStore for FakeKernel {
    fn open_count(&self, executable: ExecutableId) -> usize {
        self.executables[&executable].open_count
    }

    fn device(&self, _executable: ExecutableId) -> DeviceId {
        DEVICE
    }

    fn bmap(&self, executable: ExecutableId, block: u32) -> BlockNumber {
        self.executables[&executable]
            .blocks
            .get(block as usize)
            .copied()
            .unwrap_or(0)
    }
}

impl BlockDevice for FakeKernel {
    fn read_block(&mut self, device: DeviceId, block: BlockNumber) -> Result<Block, BlockError> {
        if self.failing_block == Some(block) {
            return Err(BlockError::Io { device, block });
        }
        self.reads.push(block);
        self.disk.get(&block).copied().ok_or(BlockError::Io { device, block })
    }
}

/// The frame mapped at image offset `offset` of `pid`.
pub fn frame_at(mm: &MemoryManager, kernel: &FakeKernel, pid: Pid, offset: u32) -> kernel_memory_addresses::PhysicalPage<kernel_memory_addresses::Size4K> {
    mm.translate(kernel.space(pid), kernel.at(pid, offset))
        .expect("page is mapped")
        .page()
}

/// Read `len` bytes at image offset `offset` as `pid`.
pub fn read(mm: &mut MemoryManager, kernel: &mut FakeKernel, pid: Pid, offset: u32, len: usize) -> Vec<u8> {
    let va = kernel.at(pid, offset);
    let mut buf = vec![0; len];
    mm.copy_from_user(kernel.run(pid), va, &mut buf).unwrap();
    buf
}

/// Write `bytes` at image offset `offset` as `pid`.
pub fn write(mm: &mut MemoryManager, kernel: &mut FakeKernel, pid: Pid, offset: u32, bytes: &[u8]) {
    let va = kernel.at(pid, offset);
    mm.copy_to_user(kernel.run(pid), va, bytes).unwrap();
}
