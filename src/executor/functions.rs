//! The opcode handlers. This is the interpreter core: one method per opcode
//! family, dispatched from a single match over [`Commands`].
//!
//! [`Functions`] owns all per-execution state (parser position, registers,
//! control stack, declaration tables) and mutably builds the region table
//! that outlives the run. Everything here is driven by [`Functions::run`];
//! any `Err` aborts the execution with no partial-success mode.

use log::{debug, info, trace};

use crate::{
    commands::{ArithOperation, CommandWord, Commands, Condition, LogicOperation, RegionFlags},
    constants::{
        END_SPEC_SENTINEL, MAX_CONSTRUCTORS, MAX_MEM_REGIONS, MAX_NESTED_BLOCKS, MAX_PACKSPEC_SLOTS,
        MAX_REGISTERS, MAX_STRUCT_SLOTS, WORD_SIZE,
    },
    file::{io::write_le_at, parser::Parser},
    random::{RandomDistribution, RandomTable},
    region::{MemoryRegion, MemoryRegionCollection, MemoryRegionReal, MemoryRegionReference},
    structure::{DataType, StructDef, StructElement, StructTable},
    Result,
};

/// One entry on the control stack.
enum Frame {
    /// An IF (or ELSE) branch currently executing.
    Conditional,
    /// A loop body. `body` is the offset of the first instruction after LOOP.
    Loop {
        counter: usize,
        end: i64,
        step: i64,
        body: usize,
    },
    /// A constructor invocation. `return_pos` is where CONSTRUCT left off.
    Call { return_pos: usize },
}

/// Where a skip-scan for a false IF branch stopped.
#[derive(PartialEq, Eq)]
enum BranchEnd {
    AtElse,
    AtEndIf,
}

/// The interpreter state for one execution of a spec.
pub(crate) struct Functions<'a> {
    parser: Parser<'a>,
    registers: [i64; MAX_REGISTERS],
    regions: MemoryRegionCollection,
    structs: StructTable,
    random: RandomTable,
    focus: Option<usize>,
    space_remaining: u64,
    frames: Vec<Frame>,
    constructors: [Option<usize>; MAX_CONSTRUCTORS],
    packspecs: [Option<usize>; MAX_PACKSPEC_SLOTS],
}

impl<'a> Functions<'a> {
    /// Fresh state over `data` with `memory_space` bytes of target memory to
    /// allocate from.
    pub(crate) fn new(data: &'a [u8], memory_space: u32) -> Self {
        Functions {
            parser: Parser::new(data),
            registers: [0; MAX_REGISTERS],
            regions: MemoryRegionCollection::new(),
            structs: StructTable::new(),
            random: RandomTable::new(),
            focus: None,
            space_remaining: u64::from(memory_space),
            frames: Vec::new(),
            constructors: [None; MAX_CONSTRUCTORS],
            packspecs: [None; MAX_PACKSPEC_SLOTS],
        }
    }

    /// Run the spec to END_SPEC or the first fatal error.
    pub(crate) fn run(&mut self) -> Result<()> {
        loop {
            // A spec that ends without END_SPEC is truncated
            if !self.parser.has_more_data() {
                return Err(crate::Error::OutOfBounds);
            }

            let offset = self.parser.pos();
            let word = self.parser.read_le::<u32>()?;
            let cmd = CommandWord(word);
            let Some(command) = cmd.command() else {
                return Err(crate::Error::UnimplementedCommand {
                    command: word,
                    offset,
                });
            };

            trace!("{offset:#06x}: {command:?} ({word:#010x})");
            if let Some(expected) = Self::expected_operands(command, cmd) {
                Self::expect_operands(cmd, expected)?;
            }
            if self.execute_one(command, cmd, offset)? {
                return Ok(());
            }
        }
    }

    /// Surrender the constructed region table.
    pub(crate) fn finish(self) -> MemoryRegionCollection {
        self.regions
    }

    /// Execute one decoded instruction; returns `true` on END_SPEC.
    fn execute_one(&mut self, command: Commands, cmd: CommandWord, offset: usize) -> Result<bool> {
        match command {
            Commands::Break => return Err(crate::Error::ExecuteBreak { offset }),
            Commands::Nop => {}
            Commands::Reserve => self.reserve(cmd)?,
            Commands::Free => self.free(cmd)?,
            Commands::Reference => self.reference(cmd)?,
            Commands::SwitchFocus => self.switch_focus(cmd)?,
            Commands::Write => self.write(cmd)?,
            Commands::WriteArray => self.write_array()?,
            Commands::WriteStruct => self.write_struct(cmd)?,
            Commands::Read => self.read(cmd)?,
            Commands::BlockCopy => self.block_copy(cmd)?,
            Commands::GetWrPtr => self.get_write_pointer(cmd)?,
            Commands::SetWrPtr => self.set_write_pointer(cmd)?,
            Commands::AlignWrPtr => self.align_write_pointer(cmd)?,
            Commands::Mv => self.mv(cmd)?,
            Commands::ArithOp => self.arith_op(cmd)?,
            Commands::LogicOp => self.logic_op(cmd)?,
            Commands::If => self.start_conditional(cmd)?,
            Commands::Else => self.else_clause()?,
            Commands::EndIf => self.end_conditional()?,
            Commands::Loop => self.start_loop(cmd)?,
            Commands::EndLoop => self.end_loop()?,
            Commands::BreakLoop => self.break_loop()?,
            Commands::StartStruct => self.declare_struct(cmd)?,
            Commands::StructElem | Commands::EndStruct => {
                return Err(malformed_error!(
                    "{:?} outside a structure declaration",
                    command
                ));
            }
            Commands::WriteParam => self.write_param(cmd)?,
            Commands::WriteParamComponent => self.write_param_component(cmd)?,
            Commands::ReadParam => self.read_param(cmd)?,
            Commands::CopyStruct => self.copy_struct(cmd)?,
            Commands::CopyParam => self.copy_param(cmd)?,
            Commands::StartConstructor => self.declare_constructor(cmd)?,
            Commands::EndConstructor => self.end_constructor()?,
            Commands::Construct => self.construct(cmd)?,
            Commands::StartPackspec => self.declare_packspec(cmd)?,
            Commands::PackParam | Commands::EndPackspec => {
                return Err(malformed_error!(
                    "{:?} outside a packing specification",
                    command
                ));
            }
            Commands::DeclareRng => self.declare_rng(cmd)?,
            Commands::DeclareRandomDist => self.declare_random_dist(cmd)?,
            Commands::GetRandomNumber => self.get_random_number(cmd)?,
            Commands::PrintVal => self.print_value(cmd)?,
            Commands::PrintTxt => self.print_text(cmd)?,
            Commands::PrintStruct => self.print_struct(cmd)?,
            Commands::EndSpec => {
                let sentinel = self.parser.read_le::<i32>()?;
                if sentinel != END_SPEC_SENTINEL {
                    return Err(malformed_error!(
                        "END_SPEC operand {:#010x} is not the end sentinel",
                        sentinel
                    ));
                }
                debug!("spec complete, {} bytes allocated", self.regions.total_allocated());
                return Ok(true);
            }
        }
        Ok(false)
    }

    //
    // Operand helpers
    //

    /// Operand words the handler for `command` will consume, where the
    /// arity follows from the command word alone. `None` for commands whose
    /// arity depends on runtime state (declared element widths, stream
    /// payloads) or that abort before reading operands.
    fn expected_operands(command: Commands, cmd: CommandWord) -> Option<usize> {
        let imm = |reg: Option<usize>| usize::from(reg.is_none());
        Some(match command {
            Commands::Nop
            | Commands::Free
            | Commands::SwitchFocus
            | Commands::WriteStruct
            | Commands::Read
            | Commands::GetWrPtr
            | Commands::AlignWrPtr
            | Commands::Else
            | Commands::EndIf
            | Commands::EndLoop
            | Commands::BreakLoop
            | Commands::StartStruct
            | Commands::ReadParam
            | Commands::CopyStruct
            | Commands::StartConstructor
            | Commands::EndConstructor
            | Commands::Construct
            | Commands::StartPackspec
            | Commands::GetRandomNumber
            | Commands::PrintStruct => 0,
            Commands::Reference
            | Commands::WriteArray
            | Commands::CopyParam
            | Commands::DeclareRng
            | Commands::EndSpec => 1,
            Commands::DeclareRandomDist => 2,
            Commands::Reserve => {
                1 + usize::from(cmd.region_flags().contains(RegionFlags::REFERENCEABLE))
            }
            Commands::Write => {
                if cmd.src1_register().is_some() {
                    0
                } else if cmd.data_length() == 8 {
                    2
                } else {
                    1
                }
            }
            Commands::SetWrPtr | Commands::Mv | Commands::PrintVal => imm(cmd.src1_register()),
            Commands::ArithOp => imm(cmd.src1_register()) + imm(cmd.src2_register()),
            Commands::LogicOp => {
                if cmd.id() == LogicOperation::Not as u8 {
                    imm(cmd.src1_register())
                } else {
                    imm(cmd.src1_register()) + imm(cmd.src2_register())
                }
            }
            Commands::BlockCopy | Commands::Loop => {
                imm(cmd.dest_register()) + imm(cmd.src1_register()) + imm(cmd.src2_register())
            }
            Commands::WriteParamComponent => 1 + imm(cmd.src1_register()),
            Commands::Break
            | Commands::If
            | Commands::StructElem
            | Commands::EndStruct
            | Commands::WriteParam
            | Commands::PackParam
            | Commands::EndPackspec
            | Commands::PrintTxt => return None,
        })
    }

    /// Reject a command word whose encoded length disagrees with the
    /// operands its handler consumes; an arity mismatch would desynchronize
    /// instruction decode from the stream.
    fn expect_operands(cmd: CommandWord, expected: usize) -> Result<()> {
        if cmd.operand_words() != expected {
            return Err(malformed_error!(
                "command {:#010x} encodes {} operand words where {} are expected",
                cmd.raw(),
                cmd.operand_words(),
                expected
            ));
        }
        Ok(())
    }

    /// Value of a validated register.
    fn register(&self, index: usize) -> Result<i64> {
        if index >= MAX_REGISTERS {
            return Err(malformed_error!("register {} does not exist", index));
        }
        Ok(self.registers[index])
    }

    /// Store to a validated register.
    fn set_register(&mut self, index: usize, value: i64) -> Result<()> {
        if index >= MAX_REGISTERS {
            return Err(malformed_error!("register {} does not exist", index));
        }
        self.registers[index] = value;
        Ok(())
    }

    /// Fetch an operand: a register when `reg` is set, otherwise the next
    /// trailing word, sign-extended.
    fn operand(&mut self, reg: Option<usize>) -> Result<i64> {
        match reg {
            Some(index) => self.register(index),
            None => Ok(i64::from(self.parser.read_le::<i32>()?)),
        }
    }

    /// Operand coerced to a non-negative size or address.
    fn operand_unsigned(&mut self, reg: Option<usize>) -> Result<usize> {
        let value = self.operand(reg)?;
        usize::try_from(value).map_err(|_| malformed_error!("operand {} must not be negative", value))
    }

    /// The focused region, or the error for writing with no focus.
    fn focused(&mut self) -> Result<&mut MemoryRegionReal> {
        let index = self.focus.ok_or(crate::Error::NoRegionSelected)?;
        self.regions.get_real_mut(index)
    }

    fn push_frame(&mut self, frame: Frame) -> Result<()> {
        if self.frames.len() >= MAX_NESTED_BLOCKS {
            return Err(crate::Error::NestingLimit(MAX_NESTED_BLOCKS));
        }
        self.frames.push(frame);
        Ok(())
    }

    //
    // Skip scanning
    //

    /// Advance past the operands of the instruction whose command word was
    /// just read, without executing it.
    ///
    /// WRITE_ARRAY carries its payload length in its first operand word, so
    /// its encoded length field alone does not cover the payload.
    fn skip_operands(&mut self, cmd: CommandWord) -> Result<()> {
        if cmd.command() == Some(Commands::WriteArray) {
            let words = self.parser.read_le::<u32>()? as usize;
            self.parser.advance_by(words * WORD_SIZE)
        } else {
            self.parser.advance_by(cmd.operand_words() * WORD_SIZE)
        }
    }

    /// Scan forward to the matching `close` for an already-consumed `open`,
    /// consuming the terminator. Nested `open`/`close` pairs are tracked.
    fn skip_block(&mut self, open: Commands, close: Commands) -> Result<()> {
        let mut depth = 0usize;
        loop {
            let word = self.parser.read_le::<u32>()?;
            let cmd = CommandWord(word);
            match cmd.command() {
                Some(c) if c == open => depth += 1,
                Some(c) if c == close => {
                    if depth == 0 {
                        self.skip_operands(cmd)?;
                        return Ok(());
                    }
                    depth -= 1;
                }
                _ => {}
            }
            self.skip_operands(cmd)?;
        }
    }

    /// Scan a false IF branch forward to its ELSE or END_IF, consuming the
    /// terminator.
    fn skip_branch(&mut self) -> Result<BranchEnd> {
        let mut depth = 0usize;
        loop {
            let word = self.parser.read_le::<u32>()?;
            let cmd = CommandWord(word);
            match cmd.command() {
                Some(Commands::If) => depth += 1,
                Some(Commands::EndIf) => {
                    if depth == 0 {
                        return Ok(BranchEnd::AtEndIf);
                    }
                    depth -= 1;
                }
                Some(Commands::Else) if depth == 0 => return Ok(BranchEnd::AtElse),
                _ => {}
            }
            self.skip_operands(cmd)?;
        }
    }

    //
    // Region management
    //

    fn reserve(&mut self, cmd: CommandWord) -> Result<()> {
        let index = cmd.region();
        let flags = cmd.region_flags();
        let size = self.parser.read_le::<u32>()?;
        let reference = if flags.contains(RegionFlags::REFERENCEABLE) {
            Some(self.parser.read_le::<u32>()?)
        } else {
            None
        };

        if size == 0 {
            return Err(malformed_error!(
                "reservation of zero bytes for region {}",
                index
            ));
        }

        // Round up to a whole word; target memory is word-granular
        let rounded = u64::from(size).div_ceil(WORD_SIZE as u64) * WORD_SIZE as u64;
        if rounded > self.space_remaining {
            return Err(crate::Error::MemoryLimitExceeded {
                requested: rounded,
                remaining: self.space_remaining,
            });
        }

        let unfilled = flags.contains(RegionFlags::UNFILLED);
        #[allow(clippy::cast_possible_truncation)]
        self.regions.insert(MemoryRegion::Real(MemoryRegionReal::new(
            index,
            rounded as usize,
            unfilled,
            reference,
        )))?;
        self.space_remaining -= rounded;

        debug!("reserved region {index}: {rounded} bytes, unfilled={unfilled}");
        Ok(())
    }

    fn region_operand(&mut self, cmd: CommandWord, field: usize) -> Result<usize> {
        let index = match cmd.src1_register() {
            Some(reg) => self.operand_unsigned(Some(reg))?,
            None => field,
        };
        if index >= MAX_MEM_REGIONS {
            return Err(malformed_error!("region {} does not exist", index));
        }
        Ok(index)
    }

    fn free(&mut self, cmd: CommandWord) -> Result<()> {
        let index = self.region_operand(cmd, cmd.region() as usize)?;
        #[allow(clippy::cast_possible_truncation)]
        let removed = self.regions.remove(index as u8)?;
        if let MemoryRegion::Real(real) = &removed {
            self.space_remaining += real.size() as u64;
        }
        if self.focus == Some(index) {
            self.focus = None;
        }
        Ok(())
    }

    fn reference(&mut self, cmd: CommandWord) -> Result<()> {
        let index = cmd.region();
        let reference = self.parser.read_le::<u32>()?;
        self.regions
            .insert(MemoryRegion::Reference(MemoryRegionReference::new(
                index, reference,
            )))
    }

    fn switch_focus(&mut self, cmd: CommandWord) -> Result<()> {
        let index = self.region_operand(cmd, cmd.src1_field())?;
        // Fails for empty slots and reference regions alike
        self.regions.get_real_mut(index)?;
        self.focus = Some(index);
        Ok(())
    }

    //
    // Writing
    //

    /// Serialize `value` at `width` bytes, little-endian, `repeats` times.
    ///
    /// The value is encoded once and streamed; no intermediate buffer scales
    /// with the repeat count, so a run that overshoots the region fails at
    /// the first write that no longer fits.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn write_value(&mut self, value: i64, width: usize, repeats: u32) -> Result<()> {
        let mut chunk = [0u8; 8];
        let mut encoded = 0;
        match width {
            1 => write_le_at(&mut chunk, &mut encoded, value as u8)?,
            2 => write_le_at(&mut chunk, &mut encoded, value as u16)?,
            4 => write_le_at(&mut chunk, &mut encoded, value as u32)?,
            _ => write_le_at(&mut chunk, &mut encoded, value)?,
        }

        let region = self.focused()?;
        for _ in 0..repeats {
            region.write_bytes(&chunk[..encoded])?;
        }
        Ok(())
    }

    fn write(&mut self, cmd: CommandWord) -> Result<()> {
        let width = cmd.data_length();
        let repeats = match cmd.src2_register() {
            Some(reg) => {
                let value = self.register(reg)?;
                u32::try_from(value)
                    .map_err(|_| malformed_error!("negative repeat count {}", value))?
            }
            None => cmd.repeats(),
        };
        let value = match cmd.src1_register() {
            Some(reg) => self.register(reg)?,
            None if width == 8 => self.parser.read_le::<i64>()?,
            None => self.operand(None)?,
        };

        self.write_value(value, width, repeats)
    }

    fn write_array(&mut self) -> Result<()> {
        let words = self.parser.read_le::<u32>()? as usize;
        let payload = self.parser.read_bytes(words * WORD_SIZE)?;
        self.focused()?.write_bytes(payload)
    }

    fn write_struct(&mut self, cmd: CommandWord) -> Result<()> {
        let repeats = match cmd.src1_register() {
            Some(reg) => {
                let value = self.register(reg)?;
                u32::try_from(value)
                    .map_err(|_| malformed_error!("negative repeat count {}", value))?
            }
            None => 1,
        };
        let bytes = self.structs.get(cmd.id())?.to_bytes();

        let region = self.focused()?;
        for _ in 0..repeats {
            region.write_bytes(&bytes)?;
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn read(&mut self, cmd: CommandWord) -> Result<()> {
        let dest = cmd
            .dest_register()
            .ok_or_else(|| malformed_error!("READ requires a destination register"))?;
        let width = cmd.data_length();

        let mut raw = [0u8; 8];
        {
            let region = self.focused()?;
            let bytes = region.read_bytes(width)?;
            raw[..width].copy_from_slice(bytes);
        }
        self.set_register(dest, u64::from_le_bytes(raw) as i64)
    }

    fn block_copy(&mut self, cmd: CommandWord) -> Result<()> {
        let dest = self.operand_unsigned(cmd.dest_register())?;
        let src = self.operand_unsigned(cmd.src1_register())?;
        let length = self.operand_unsigned(cmd.src2_register())?;
        self.focused()?.block_copy(dest, src, length)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn get_write_pointer(&mut self, cmd: CommandWord) -> Result<()> {
        let dest = cmd
            .dest_register()
            .ok_or_else(|| malformed_error!("GET_WR_PTR requires a destination register"))?;
        let pointer = self.focused()?.write_pointer();
        self.set_register(dest, pointer as i64)
    }

    fn set_write_pointer(&mut self, cmd: CommandWord) -> Result<()> {
        let value = self.operand(cmd.src1_register())?;
        let region = self.focused()?;
        let target = if cmd.is_relative() {
            #[allow(clippy::cast_possible_wrap)]
            let current = region.write_pointer() as i64;
            current.wrapping_add(value)
        } else {
            value
        };
        let address = usize::try_from(target)
            .map_err(|_| malformed_error!("write pointer target {} is negative", target))?;
        region.set_write_pointer(address)
    }

    fn align_write_pointer(&mut self, cmd: CommandWord) -> Result<()> {
        let log_boundary = match cmd.src1_register() {
            Some(reg) => {
                let value = self.register(reg)?;
                u32::try_from(value).map_err(|_| crate::Error::InvalidAlignment(u32::MAX))?
            }
            None => u32::from(cmd.region()),
        };
        if log_boundary >= 32 {
            return Err(crate::Error::InvalidAlignment(log_boundary));
        }

        let boundary = 1usize << log_boundary;
        let pointer = {
            let region = self.focused()?;
            let current = region.write_pointer();
            let aligned = current.div_ceil(boundary) * boundary;
            // Pad the gap with zeroes so the cursor move counts as a write
            if aligned > current {
                if aligned > region.size() {
                    return Err(crate::Error::NoMoreSpace {
                        remaining: region.remaining(),
                        needed: aligned - current,
                        region: region.index(),
                    });
                }
                let padding = vec![0u8; aligned - current];
                region.write_bytes(&padding)?;
            }
            region.write_pointer()
        };

        if let Some(dest) = cmd.dest_register() {
            #[allow(clippy::cast_possible_wrap)]
            self.set_register(dest, pointer as i64)?;
        }
        Ok(())
    }

    //
    // Registers and arithmetic
    //

    fn mv(&mut self, cmd: CommandWord) -> Result<()> {
        let dest = cmd
            .dest_register()
            .ok_or_else(|| malformed_error!("MV requires a destination register"))?;
        let value = self.operand(cmd.src1_register())?;
        self.set_register(dest, value)
    }

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    fn arith_op(&mut self, cmd: CommandWord) -> Result<()> {
        let dest = cmd
            .dest_register()
            .ok_or_else(|| malformed_error!("ARITH_OP requires a destination register"))?;
        let op = ArithOperation::from_repr(cmd.id())
            .ok_or_else(|| malformed_error!("unknown arithmetic operation {}", cmd.id()))?;
        let left = self.operand(cmd.src1_register())?;
        let right = self.operand(cmd.src2_register())?;

        let divisor_is_zero = right == 0
            && matches!(op, ArithOperation::Divide | ArithOperation::Modulo);
        if divisor_is_zero {
            return Err(crate::Error::DivideByZero);
        }

        let result = if cmd.is_signed() {
            match op {
                ArithOperation::Add => left.wrapping_add(right),
                ArithOperation::Subtract => left.wrapping_sub(right),
                ArithOperation::Multiply => left.wrapping_mul(right),
                ArithOperation::Divide => left.wrapping_div(right),
                ArithOperation::Modulo => left.wrapping_rem(right),
            }
        } else {
            let (left, right) = (left as u64, right as u64);
            (match op {
                ArithOperation::Add => left.wrapping_add(right),
                ArithOperation::Subtract => left.wrapping_sub(right),
                ArithOperation::Multiply => left.wrapping_mul(right),
                ArithOperation::Divide => left / right,
                ArithOperation::Modulo => left % right,
            }) as i64
        };

        self.set_register(dest, result)
    }

    fn logic_op(&mut self, cmd: CommandWord) -> Result<()> {
        let dest = cmd
            .dest_register()
            .ok_or_else(|| malformed_error!("LOGIC_OP requires a destination register"))?;
        let op = LogicOperation::from_repr(cmd.id())
            .ok_or_else(|| malformed_error!("unknown logic operation {}", cmd.id()))?;
        let left = self.operand(cmd.src1_register())?;

        #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
        let result = {
            let left = left as u64;
            let value = if op == LogicOperation::Not {
                !left
            } else {
                let right = self.operand(cmd.src2_register())? as u64;
                match op {
                    LogicOperation::LeftShift => left.checked_shl(right as u32).unwrap_or(0),
                    LogicOperation::RightShift => left.checked_shr(right as u32).unwrap_or(0),
                    LogicOperation::Or => left | right,
                    LogicOperation::And => left & right,
                    LogicOperation::Xor => left ^ right,
                    LogicOperation::Not => unreachable!(),
                }
            };
            value as i64
        };

        self.set_register(dest, result)
    }

    //
    // Control flow
    //

    fn start_conditional(&mut self, cmd: CommandWord) -> Result<()> {
        let condition = Condition::from_repr(cmd.id())
            .ok_or_else(|| malformed_error!("unknown condition code {}", cmd.id()))?;
        let left = self
            .register(cmd.src1_register().ok_or_else(|| {
                malformed_error!("IF requires its left operand in a register")
            })?)?;
        let right = match cmd.src2_register() {
            Some(reg) => {
                Self::expect_operands(cmd, 0)?;
                self.register(reg)?
            }
            // One-word form compares against an immediate; the bare form
            // compares against zero
            None => match cmd.operand_words() {
                0 => 0,
                1 => self.operand(None)?,
                words => {
                    return Err(malformed_error!(
                        "IF encodes {} operand words where at most 1 is expected",
                        words
                    ));
                }
            },
        };

        if condition.evaluate(left, right) {
            self.push_frame(Frame::Conditional)
        } else {
            match self.skip_branch()? {
                BranchEnd::AtElse => self.push_frame(Frame::Conditional),
                BranchEnd::AtEndIf => Ok(()),
            }
        }
    }

    fn else_clause(&mut self) -> Result<()> {
        // Reaching ELSE while running means the true branch just finished
        match self.frames.last() {
            Some(Frame::Conditional) => {}
            _ => return Err(malformed_error!("ELSE without a matching IF")),
        }
        self.skip_block(Commands::If, Commands::EndIf)?;
        self.frames.pop();
        Ok(())
    }

    fn end_conditional(&mut self) -> Result<()> {
        match self.frames.pop() {
            Some(Frame::Conditional) => Ok(()),
            _ => Err(malformed_error!("END_IF without a matching IF")),
        }
    }

    fn loop_continues(counter: i64, end: i64, step: i64) -> bool {
        (step > 0 && counter < end) || (step < 0 && counter > end)
    }

    fn start_loop(&mut self, cmd: CommandWord) -> Result<()> {
        let counter = cmd.region() as usize;
        if counter >= MAX_REGISTERS {
            return Err(malformed_error!("register {} does not exist", counter));
        }
        let start = self.operand(cmd.dest_register())?;
        let end = self.operand(cmd.src1_register())?;
        let step = self.operand(cmd.src2_register())?;
        if step == 0 {
            return Err(malformed_error!("loop with a step of zero never ends"));
        }

        self.registers[counter] = start;
        if Self::loop_continues(start, end, step) {
            self.push_frame(Frame::Loop {
                counter,
                end,
                step,
                body: self.parser.pos(),
            })
        } else {
            self.skip_block(Commands::Loop, Commands::EndLoop)
        }
    }

    fn end_loop(&mut self) -> Result<()> {
        let (counter, end, step, body) = match self.frames.last() {
            Some(Frame::Loop {
                counter,
                end,
                step,
                body,
            }) => (*counter, *end, *step, *body),
            _ => return Err(malformed_error!("END_LOOP without a matching LOOP")),
        };

        let next = self.registers[counter].wrapping_add(step);
        self.registers[counter] = next;
        if Self::loop_continues(next, end, step) {
            self.parser.seek(body)
        } else {
            self.frames.pop();
            Ok(())
        }
    }

    fn break_loop(&mut self) -> Result<()> {
        // Unwind conditional frames opened inside the loop body
        loop {
            match self.frames.pop() {
                Some(Frame::Loop { .. }) => break,
                Some(Frame::Conditional) => {}
                Some(Frame::Call { .. }) | None => {
                    return Err(malformed_error!("BREAK_LOOP outside a loop"));
                }
            }
        }
        self.skip_block(Commands::Loop, Commands::EndLoop)
    }

    //
    // Structures
    //

    fn struct_id(id: u8) -> Result<u8> {
        if usize::from(id) >= MAX_STRUCT_SLOTS {
            return Err(crate::Error::NoSuchStruct(id));
        }
        Ok(id)
    }

    /// Sign- or zero-extend a declared value according to its type.
    #[allow(clippy::cast_possible_wrap)]
    fn read_typed_value(&mut self, data_type: DataType, operand_words: usize) -> Result<i64> {
        match operand_words {
            0 => Ok(0),
            1 => {
                let word = self.parser.read_le::<u32>()?;
                Ok(match data_type {
                    DataType::I8 | DataType::I16 | DataType::I32 | DataType::I64 => {
                        i64::from(word as i32)
                    }
                    _ => i64::from(word),
                })
            }
            2 => {
                #[allow(clippy::cast_possible_wrap)]
                let value = self.parser.read_le::<u64>()? as i64;
                Ok(value)
            }
            _ => Err(malformed_error!(
                "unexpected operand count {} for a typed value",
                operand_words
            )),
        }
    }

    /// Consume a whole START_STRUCT .. END_STRUCT declaration inline.
    fn declare_struct(&mut self, cmd: CommandWord) -> Result<()> {
        let id = Self::struct_id(cmd.id())?;
        let mut def = StructDef::new();

        loop {
            let word = self.parser.read_le::<u32>()?;
            let element = CommandWord(word);
            match element.command() {
                Some(Commands::StructElem) => {
                    let code = element.region();
                    let data_type = DataType::from_repr(code).ok_or_else(|| {
                        malformed_error!("unknown element type code {}", code)
                    })?;
                    let value = self.read_typed_value(data_type, element.operand_words())?;
                    def.push(StructElement::new(data_type, value))?;
                }
                Some(Commands::EndStruct) => break,
                _ => {
                    return Err(malformed_error!(
                        "unexpected command {:#010x} inside a structure declaration",
                        word
                    ));
                }
            }
        }

        self.structs.declare(id, def)
    }

    fn element_value(&mut self, cmd: CommandWord, width: usize) -> Result<i64> {
        match cmd.src1_register() {
            Some(reg) => self.register(reg),
            None if width == 8 => {
                #[allow(clippy::cast_possible_wrap)]
                let value = self.parser.read_le::<u64>()? as i64;
                Ok(value)
            }
            None => self.operand(None),
        }
    }

    fn write_param(&mut self, cmd: CommandWord) -> Result<()> {
        let id = Self::struct_id(cmd.id())?;
        let index = cmd.element_index();
        let width = self
            .structs
            .get(id)?
            .element(index)
            .ok_or(crate::Error::NoSuchElement {
                structure: id,
                element: index,
            })?
            .data_type()
            .width();
        let expected = if cmd.src1_register().is_some() {
            0
        } else if width == 8 {
            2
        } else {
            1
        };
        Self::expect_operands(cmd, expected)?;
        let value = self.element_value(cmd, width)?;

        self.structs
            .get_mut(id)?
            .element_mut(index)
            .ok_or(crate::Error::NoSuchElement {
                structure: id,
                element: index,
            })?
            .set_value(value);
        Ok(())
    }

    fn write_param_component(&mut self, cmd: CommandWord) -> Result<()> {
        let id = Self::struct_id(cmd.id())?;
        let index = cmd.element_index();
        let descriptor = self.parser.read_le::<u32>()?;
        let shift = descriptor & 0xFF;
        let width = (descriptor >> 8) & 0xFF;
        if shift >= 64 || width == 0 || width > 64 {
            return Err(malformed_error!(
                "bit-field of {} bits at shift {} does not fit a parameter",
                width,
                shift
            ));
        }
        let value = self.operand(cmd.src1_register())?;

        let element = self
            .structs
            .get_mut(id)?
            .element_mut(index)
            .ok_or(crate::Error::NoSuchElement {
                structure: id,
                element: index,
            })?;

        #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
        {
            let mask = if width == 64 {
                u64::MAX
            } else {
                ((1u64 << width) - 1) << shift
            };
            let merged = (element.value() as u64 & !mask) | (((value as u64) << shift) & mask);
            element.set_value(merged as i64);
        }
        Ok(())
    }

    fn read_param(&mut self, cmd: CommandWord) -> Result<()> {
        let dest = cmd
            .dest_register()
            .ok_or_else(|| malformed_error!("READ_PARAM requires a destination register"))?;
        let id = Self::struct_id(cmd.id())?;
        let index = cmd.element_index();
        let value = self
            .structs
            .get(id)?
            .element(index)
            .ok_or(crate::Error::NoSuchElement {
                structure: id,
                element: index,
            })?
            .value();
        self.set_register(dest, value)
    }

    fn copy_struct(&mut self, cmd: CommandWord) -> Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        let dest = Self::struct_id(cmd.dest_field() as u8)?;
        #[allow(clippy::cast_possible_truncation)]
        let src = Self::struct_id(cmd.src1_field() as u8)?;
        let def = self.structs.get(src)?.clone();
        self.structs.replace(dest, def);
        Ok(())
    }

    fn copy_param(&mut self, cmd: CommandWord) -> Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        let dest_struct = Self::struct_id(cmd.dest_field() as u8)?;
        #[allow(clippy::cast_possible_truncation)]
        let src_struct = Self::struct_id(cmd.src1_field() as u8)?;
        let word = self.parser.read_le::<u32>()?;
        let dest_index = (word & 0xFF) as usize;
        let src_index = ((word >> 8) & 0xFF) as usize;

        let value = self
            .structs
            .get(src_struct)?
            .element(src_index)
            .ok_or(crate::Error::NoSuchElement {
                structure: src_struct,
                element: src_index,
            })?
            .value();
        self.structs
            .get_mut(dest_struct)?
            .element_mut(dest_index)
            .ok_or(crate::Error::NoSuchElement {
                structure: dest_struct,
                element: dest_index,
            })?
            .set_value(value);
        Ok(())
    }

    //
    // Constructors and packing specifications
    //

    fn declare_constructor(&mut self, cmd: CommandWord) -> Result<()> {
        let id = cmd.id() as usize;
        if id >= MAX_CONSTRUCTORS {
            return Err(crate::Error::NoSuchConstructor(cmd.id()));
        }
        if self.constructors[id].is_some() {
            return Err(malformed_error!("constructor {} is already declared", id));
        }

        self.constructors[id] = Some(self.parser.pos());
        self.skip_block(Commands::StartConstructor, Commands::EndConstructor)
    }

    fn end_constructor(&mut self) -> Result<()> {
        match self.frames.pop() {
            Some(Frame::Call { return_pos }) => self.parser.seek(return_pos),
            _ => Err(malformed_error!(
                "END_CONSTRUCTOR outside a constructor invocation"
            )),
        }
    }

    fn construct(&mut self, cmd: CommandWord) -> Result<()> {
        let id = cmd.id();
        let body = self
            .constructors
            .get(id as usize)
            .copied()
            .flatten()
            .ok_or(crate::Error::NoSuchConstructor(id))?;

        self.push_frame(Frame::Call {
            return_pos: self.parser.pos(),
        })?;
        self.parser.seek(body)
    }

    fn declare_packspec(&mut self, cmd: CommandWord) -> Result<()> {
        let id = cmd.id() as usize;
        if id >= MAX_PACKSPEC_SLOTS {
            return Err(malformed_error!("packing specification {} does not exist", id));
        }
        if self.packspecs[id].is_some() {
            return Err(malformed_error!(
                "packing specification {} is already declared",
                id
            ));
        }

        self.packspecs[id] = Some(self.parser.pos());
        self.skip_block(Commands::StartPackspec, Commands::EndPackspec)
    }

    //
    // Random numbers
    //

    fn declare_rng(&mut self, cmd: CommandWord) -> Result<()> {
        let seed = self.parser.read_le::<u32>()?;
        self.random.declare_rng(cmd.id(), seed)
    }

    fn declare_random_dist(&mut self, cmd: CommandWord) -> Result<()> {
        let param0 = self.parser.read_le::<u32>()?;
        let param1 = self.parser.read_le::<u32>()?;
        let dist = RandomDistribution::from_encoding(cmd.id2(), cmd.id3(), param0, param1)?;
        self.random.declare_distribution(cmd.id(), dist)
    }

    fn get_random_number(&mut self, cmd: CommandWord) -> Result<()> {
        let dest = cmd.dest_register().ok_or_else(|| {
            malformed_error!("GET_RANDOM_NUMBER requires a destination register")
        })?;
        let value = self.random.sample(cmd.id())?;
        self.set_register(dest, value)
    }

    //
    // Diagnostics
    //

    fn print_value(&mut self, cmd: CommandWord) -> Result<()> {
        let value = self.operand(cmd.src1_register())?;
        info!("print: {value:#x} ({value})");
        Ok(())
    }

    fn print_text(&mut self, cmd: CommandWord) -> Result<()> {
        let length = (cmd.repeats() as usize + 1).min(cmd.operand_words() * WORD_SIZE);
        let raw = self.parser.read_bytes(cmd.operand_words() * WORD_SIZE)?;
        let text = String::from_utf8_lossy(&raw[..length]);
        info!("print: {text}");
        Ok(())
    }

    fn print_struct(&mut self, cmd: CommandWord) -> Result<()> {
        let id = Self::struct_id(cmd.id())?;
        let def = self.structs.get(id)?;
        for (index, element) in def.elements().enumerate() {
            info!(
                "struct {id} element {index}: {:?} = {:#x}",
                element.data_type(),
                element.value()
            );
        }
        Ok(())
    }
}
