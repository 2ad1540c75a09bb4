//! Debug information: for each recorded pc, the chain of inlined frames and where their values
//! live. Deoptimization reads it to rebuild interpreter frames.

use super::compiled_code::{BytecodeFrame, DebugInfo, JavaValue, Location, SlotKind, VirtualObject};
use super::oop_map::VMReg;
use crate::util::ObjectReference;
use crate::vm::{KlassRef, MethodRef, PrimitiveValue};

/// How a value is stored in its location.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LocationType {
    Normal,
    Oop,
    NarrowOop,
    /// An int in a 64 bit register.
    IntInLong,
    Lng,
    Dbl,
}

/// A value as deoptimization sees it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ScopeValue {
    Location { reg: VMReg, ty: LocationType },
    ConstantInt(i32),
    ConstantLong(i64),
    ConstantDouble(f64),
    ConstantOop(Option<ObjectReference>),
    /// A scalar-replaced object, by id into the objects of the pc.
    Object(u32),
    Illegal,
}

/// A lock held by a frame.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MonitorValue {
    pub owner: ScopeValue,
    pub basic_lock: VMReg,
    pub eliminated: bool,
}

/// An object to reallocate on deoptimization.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectValue {
    pub id: u32,
    pub klass: KlassRef,
    pub field_values: Vec<ScopeValue>,
    pub is_auto_box: bool,
}

/// How much of a frame chain to record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScopeMode {
    /// Only methods and bcis.
    BytecodePosition,
    /// Methods, bcis and values.
    FullFrame,
}

/// One frame of a recorded pc.
#[derive(Clone, Debug, PartialEq)]
pub struct ScopeRecord {
    pub method: MethodRef,
    pub bci: i32,
    /// Must the interpreter re-execute the bytecode at `bci`?
    pub reexecute: bool,
    pub rethrow_exception: bool,
    /// Does the call at this pc return an object?
    pub return_oop: bool,
    /// `None` when only the position was recorded.
    pub locals: Option<Vec<ScopeValue>>,
    pub expressions: Option<Vec<ScopeValue>>,
    pub monitors: Option<Vec<MonitorValue>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PcDesc {
    pub pc_offset: u32,
    pub at_safepoint: bool,
    /// Outermost frame first.
    pub scopes: Vec<ScopeRecord>,
    pub objects: Vec<ObjectValue>,
}

/// Collects the debug information of a code blob. Pcs are recorded in ascending order; a pc
/// recorded again replaces an earlier non-safepoint record of the same pc.
#[derive(Debug, Default, PartialEq)]
pub struct DebugInformationRecorder {
    pcs: Vec<PcDesc>,
    current: Option<PcDesc>,
}

impl DebugInformationRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_safepoint(&mut self, pc_offset: u32) -> Result<(), String> {
        self.begin(pc_offset, true)
    }

    pub fn add_non_safepoint(&mut self, pc_offset: u32) -> Result<(), String> {
        self.begin(pc_offset, false)
    }

    fn begin(&mut self, pc_offset: u32, at_safepoint: bool) -> Result<(), String> {
        if self.current.is_some() {
            return Err(format!("debug info for pc {} started before the previous pc ended", pc_offset));
        }
        if let Some(last) = self.pcs.last() {
            if pc_offset < last.pc_offset {
                return Err(format!(
                    "debug info pc offsets must increase: {} after {}",
                    pc_offset, last.pc_offset
                ));
            }
        }
        self.current = Some(PcDesc {
            pc_offset,
            at_safepoint,
            scopes: vec![],
            objects: vec![],
        });
        Ok(())
    }

    pub fn describe_scope(&mut self, scope: ScopeRecord) {
        if let Some(current) = self.current.as_mut() {
            current.scopes.push(scope);
        }
    }

    pub fn set_objects(&mut self, objects: Vec<ObjectValue>) {
        if let Some(current) = self.current.as_mut() {
            current.objects = objects;
        }
    }

    /// Finish the pc started last.
    pub fn end_scopes(&mut self, pc_offset: u32) -> Result<(), String> {
        let desc = match self.current.take() {
            Some(desc) if desc.pc_offset == pc_offset => desc,
            _ => return Err(format!("no debug info started for pc {}", pc_offset)),
        };
        match self.pcs.last() {
            Some(last) if last.pc_offset == pc_offset => {
                if last.at_safepoint && !desc.at_safepoint {
                    // A safepoint carries all the information a plain infopoint has
                    return Ok(());
                }
                if last.at_safepoint {
                    return Err(format!("two safepoints at pc {}", pc_offset));
                }
                self.pcs.pop();
            }
            _ => {}
        }
        self.pcs.push(desc);
        Ok(())
    }

    pub fn pcs(&self) -> &[PcDesc] {
        &self.pcs
    }

    pub fn pc_desc_at(&self, pc_offset: u32) -> Option<&PcDesc> {
        self.pcs.iter().find(|d| d.pc_offset == pc_offset)
    }
}

/// Translates the compiler's debug info into scope records.
pub(crate) struct ScopeTranslator {
    total_frame_size: u32,
    objects: Vec<ObjectValue>,
}

impl ScopeTranslator {
    pub fn new(total_frame_size: u32) -> Self {
        ScopeTranslator {
            total_frame_size,
            objects: vec![],
        }
    }

    /// Record the virtual objects of the debug info. Every id must be unique, and may be used
    /// by the values of any object, including itself.
    pub fn record_virtual_objects(&mut self, debug_info: &DebugInfo) -> Result<(), String> {
        self.objects.clear();
        for object in debug_info.virtual_objects.iter() {
            if self.objects.iter().any(|o| o.id == object.id) {
                return Err(format!("duplicate virtual object id {}", object.id));
            }
            self.objects.push(ObjectValue {
                id: object.id,
                klass: object.klass,
                field_values: vec![],
                is_auto_box: object.is_auto_box,
            });
        }
        for (index, object) in debug_info.virtual_objects.iter().enumerate() {
            let fields = self.object_fields(object)?;
            self.objects[index].field_values = fields;
        }
        Ok(())
    }

    fn object_fields(&self, object: &VirtualObject) -> Result<Vec<ScopeValue>, String> {
        if object.values.len() != object.slot_kinds.len() {
            return Err(format!("virtual object {} has {} values but {} slot kinds", object.id, object.values.len(), object.slot_kinds.len()));
        }
        let mut fields = Vec::with_capacity(object.values.len());
        let mut i = 0;
        while i < object.values.len() {
            let kind = object.slot_kinds[i];
            let (value, second) = self.scope_value(&object.values[i], kind)?;
            fields.push(value);
            if second.is_some() {
                // The field takes the two slots, but only one value
                i += 1;
                if object.values.get(i) != Some(&JavaValue::Illegal) {
                    return Err(format!("double-slot field of virtual object {} not followed by Value.ILLEGAL", object.id));
                }
            }
            i += 1;
        }
        Ok(fields)
    }

    pub fn take_objects(&mut self) -> Vec<ObjectValue> {
        std::mem::take(&mut self.objects)
    }

    /// Translate one value. A two-slot value also returns what goes in its second slot.
    pub fn scope_value(&self, value: &JavaValue, kind: SlotKind) -> Result<(ScopeValue, Option<ScopeValue>), String> {
        let double_word = kind.is_double_word();
        match value {
            JavaValue::Illegal => {
                if kind != SlotKind::Illegal {
                    return Err(format!("unexpected illegal value, expected {:?}", kind));
                }
                Ok((ScopeValue::Illegal, None))
            }
            JavaValue::Location(location) => {
                let reg = VMReg::from_location(location, self.total_frame_size)?;
                let ty = match (location, kind) {
                    (_, SlotKind::Illegal) => return Err(format!("unexpected location {:?} for an illegal slot", location)),
                    (Location::Register(_), SlotKind::Int) => LocationType::IntInLong,
                    (Location::Stack(_), SlotKind::Int) => LocationType::Normal,
                    (_, SlotKind::Float) => LocationType::Normal,
                    (_, SlotKind::Long) => LocationType::Lng,
                    (_, SlotKind::Double) => LocationType::Dbl,
                    (_, SlotKind::Object) => LocationType::Oop,
                };
                let value = ScopeValue::Location { reg, ty };
                Ok((value, double_word.then_some(value)))
            }
            JavaValue::Primitive(p) => {
                let value = match (kind, p) {
                    (SlotKind::Int, PrimitiveValue::Boolean(_))
                    | (SlotKind::Int, PrimitiveValue::Byte(_))
                    | (SlotKind::Int, PrimitiveValue::Char(_))
                    | (SlotKind::Int, PrimitiveValue::Short(_))
                    | (SlotKind::Int, PrimitiveValue::Int(_))
                    | (SlotKind::Float, PrimitiveValue::Float(_)) => ScopeValue::ConstantInt(p.to_raw_bits() as i32),
                    (SlotKind::Long, PrimitiveValue::Long(v)) => ScopeValue::ConstantLong(*v),
                    (SlotKind::Double, PrimitiveValue::Double(v)) => ScopeValue::ConstantDouble(*v),
                    _ => return Err(format!("unexpected primitive constant {:?} for a {:?} slot", p, kind)),
                };
                Ok((value, double_word.then_some(ScopeValue::ConstantInt(1))))
            }
            JavaValue::Null => {
                if kind != SlotKind::Object {
                    return Err(format!("null constant in a {:?} slot", kind));
                }
                Ok((ScopeValue::ConstantOop(None), None))
            }
            JavaValue::Object { object, .. } => {
                if kind != SlotKind::Object {
                    return Err(format!("object constant in a {:?} slot", kind));
                }
                Ok((ScopeValue::ConstantOop(Some(*object)), None))
            }
            JavaValue::Virtual(id) => {
                if kind != SlotKind::Object {
                    return Err(format!("virtual object in a {:?} slot", kind));
                }
                if !self.objects.iter().any(|o| o.id == *id) {
                    return Err(format!("unknown virtual object id {}", id));
                }
                Ok((ScopeValue::Object(*id), None))
            }
        }
    }

    /// The scope records of a frame chain, outermost first. Only the innermost frame can return
    /// an object.
    pub fn frame_scopes(&self, frame: &BytecodeFrame, mode: ScopeMode, return_oop: bool) -> Result<Vec<ScopeRecord>, String> {
        let mut scopes = match &frame.caller {
            Some(caller) => self.frame_scopes(caller, mode, false)?,
            None => vec![],
        };
        let record = match mode {
            ScopeMode::BytecodePosition => ScopeRecord {
                method: frame.method,
                bci: frame.bci,
                reexecute: false,
                rethrow_exception: false,
                return_oop,
                locals: None,
                expressions: None,
                monitors: None,
            },
            ScopeMode::FullFrame => self.full_frame(frame, return_oop)?,
        };
        scopes.push(record);
        Ok(scopes)
    }

    fn full_frame(&self, frame: &BytecodeFrame, return_oop: bool) -> Result<ScopeRecord, String> {
        let num_locals = frame.num_locals as usize;
        let num_stack = frame.num_stack as usize;
        let num_locks = frame.num_locks as usize;
        if frame.values.len() != num_locals + num_stack + num_locks {
            return Err(format!(
                "frame has {} values, expected {} locals, {} stack slots and {} locks",
                frame.values.len(),
                num_locals,
                num_stack,
                num_locks
            ));
        }
        if frame.slot_kinds.len() != num_locals + num_stack {
            return Err(format!("frame has {} slot kinds, expected {}", frame.slot_kinds.len(), num_locals + num_stack));
        }
        if frame.locks.len() != num_locks {
            return Err(format!("frame has {} lock slots, expected {}", frame.locks.len(), num_locks));
        }
        let locals = self.slot_values(frame, 0, num_locals)?;
        let expressions = self.slot_values(frame, num_locals, num_locals + num_stack)?;
        let mut monitors = Vec::with_capacity(num_locks);
        for (i, lock) in frame.locks.iter().enumerate() {
            let (owner, _) = self.scope_value(&frame.values[num_locals + num_stack + i], SlotKind::Object)?;
            let basic_lock = VMReg::from_stack_offset(lock.slot.raw_offset(self.total_frame_size))
                .ok_or_else(|| format!("invalid lock slot {:?}", lock.slot))?;
            monitors.push(MonitorValue {
                owner,
                basic_lock,
                eliminated: lock.eliminated,
            });
        }
        Ok(ScopeRecord {
            method: frame.method,
            bci: frame.bci,
            // Negative bcis are synthetic positions that are never re-executed
            reexecute: frame.bci >= 0 && !frame.during_call,
            rethrow_exception: frame.rethrow_exception,
            return_oop,
            locals: Some(locals),
            expressions: Some(expressions),
            monitors: Some(monitors),
        })
    }

    /// Values of the slots in `[start, end)`. The real value of a two-slot local goes in its
    /// second slot, like the interpreter lays it out on 64 bit platforms.
    fn slot_values(&self, frame: &BytecodeFrame, start: usize, end: usize) -> Result<Vec<ScopeValue>, String> {
        let mut values = Vec::with_capacity(end - start);
        let mut i = start;
        while i < end {
            let (value, second) = self.scope_value(&frame.values[i], frame.slot_kinds[i])?;
            match second {
                Some(second) => {
                    i += 1;
                    if i >= end || frame.values[i] != JavaValue::Illegal {
                        return Err("double-slot value not followed by Value.ILLEGAL".to_string());
                    }
                    values.push(second);
                    values.push(value);
                }
                None => values.push(value),
            }
            i += 1;
        }
        Ok(values)
    }
}
