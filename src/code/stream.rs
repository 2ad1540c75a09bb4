//! The byte stream the compiler serializes compiled code into.
//!
//! Values are in native byte order. Metadata is written as raw pointers, which the compiler got
//! from the VM. Objects cannot be written as pointers since they may move, so they are written as
//! indexes into an object pool passed along with the stream.

use bytemuck::Pod;

use super::compiled_code::*;
use crate::env::{JVMCIError, JVMCIResult};
use crate::util::{Address, ObjectReference};
use crate::vm::{BasicType, KlassRef, MetadataKind, MetadataRef, MethodRef, PrimitiveValue};

const MAGIC: [u8; 4] = *b"JVCI";
const VERSION: u32 = 1;

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    object_pool: &'a [ObjectReference],
}

impl<'a> Reader<'a> {
    fn read<T: Pod>(&mut self) -> Result<T, String> {
        let size = std::mem::size_of::<T>();
        let end = self.pos + size;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| format!("stream truncated at {} reading {} bytes", self.pos, size))?;
        self.pos = end;
        Ok(bytemuck::pod_read_unaligned(slice))
    }

    fn u8(&mut self) -> Result<u8, String> {
        self.read::<u8>()
    }

    fn bool(&mut self) -> Result<bool, String> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(format!("invalid boolean {} at {}", b, self.pos - 1)),
        }
    }

    fn u16(&mut self) -> Result<u16, String> {
        self.read::<u16>()
    }

    fn u32(&mut self) -> Result<u32, String> {
        self.read::<u32>()
    }

    fn i32(&mut self) -> Result<i32, String> {
        self.read::<i32>()
    }

    fn i64(&mut self) -> Result<i64, String> {
        self.read::<i64>()
    }

    fn len(&mut self) -> Result<usize, String> {
        let len = self.u32()? as usize;
        // Every element takes at least one byte
        if len > self.bytes.len() - self.pos {
            return Err(format!("length {} at {} exceeds the stream", len, self.pos - 4));
        }
        Ok(len)
    }

    fn bytes(&mut self) -> Result<Vec<u8>, String> {
        let len = self.len()?;
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice.to_vec())
    }

    fn string(&mut self) -> Result<String, String> {
        String::from_utf8(self.bytes()?).map_err(|e| format!("invalid string: {}", e))
    }

    fn list<T>(&mut self, mut f: impl FnMut(&mut Self) -> Result<T, String>) -> Result<Vec<T>, String> {
        let len = self.len()?;
        (0..len).map(|_| f(self)).collect()
    }

    fn address(&mut self) -> Result<Address, String> {
        let raw = self.read::<u64>()?;
        if raw == 0 {
            return Err(format!("null metadata pointer at {}", self.pos - 8));
        }
        Ok(unsafe { Address::from_usize(raw as usize) })
    }

    fn method(&mut self) -> Result<MethodRef, String> {
        self.address().map(MethodRef)
    }

    fn klass(&mut self) -> Result<KlassRef, String> {
        self.address().map(KlassRef)
    }

    fn object(&mut self) -> Result<ObjectReference, String> {
        let index = self.u32()? as usize;
        self.object_pool
            .get(index)
            .copied()
            .ok_or_else(|| format!("object index {} is not in the pool of {}", index, self.object_pool.len()))
    }

    fn compiled_code(&mut self) -> Result<CompiledCode, String> {
        let magic: [u8; 4] = self.read()?;
        if magic != MAGIC {
            return Err("not a compiled code stream".to_string());
        }
        let version = self.u32()?;
        if version != VERSION {
            return Err(format!("unsupported stream version {}", version));
        }
        let name = self.string()?;
        let kind = match self.u8()? {
            0 => CompiledCodeKind::Nmethod {
                method: self.method()?,
                entry_bci: self.i32()?,
                compile_id: self.i32()?,
                has_unsafe_access: self.bool()?,
            },
            1 => CompiledCodeKind::RuntimeStub,
            tag => return Err(format!("invalid compiled code kind {}", tag)),
        };
        let target_code = self.bytes()?;
        let data_section = self.bytes()?;
        let data_section_alignment = self.u32()?;
        let data_section_patches = self.list(|r| {
            Ok(DataPatch {
                pc_offset: r.u32()?,
                reference: r.reference()?,
            })
        })?;
        let sites = self.list(|r| r.site())?;
        let assumptions = self.list(|r| r.assumption())?;
        let methods = self.list(|r| r.method())?;
        let comments = self.list(|r| {
            Ok(Comment {
                pc_offset: r.u32()?,
                text: r.string()?,
            })
        })?;
        let total_frame_size = self.u32()?;
        let deopt_rescue_slot = if self.bool()? { Some(self.stack_slot()?) } else { None };
        let has_wide_vectors = self.bool()?;
        if self.pos != self.bytes.len() {
            return Err(format!("{} bytes left after the compiled code", self.bytes.len() - self.pos));
        }
        Ok(CompiledCode {
            name,
            kind,
            target_code,
            data_section,
            data_section_alignment,
            data_section_patches,
            sites,
            assumptions,
            methods,
            comments,
            total_frame_size,
            deopt_rescue_slot,
            has_wide_vectors,
        })
    }

    fn reference(&mut self) -> Result<Reference, String> {
        Ok(match self.u8()? {
            0 => Reference::Object {
                object: self.object()?,
                compressed: self.bool()?,
            },
            1 => {
                let address = self.address()?;
                let kind = match self.u8()? {
                    0 => MetadataKind::Klass,
                    1 => MetadataKind::Method,
                    2 => MetadataKind::ConstantPool,
                    k => return Err(format!("invalid metadata kind {}", k)),
                };
                Reference::Metaspace {
                    metadata: MetadataRef { address, kind },
                    compressed: self.bool()?,
                }
            }
            2 => Reference::DataSection { offset: self.u32()? },
            tag => return Err(format!("invalid reference kind {}", tag)),
        })
    }

    fn site(&mut self) -> Result<Site, String> {
        let pc_offset = self.u32()?;
        let kind = match self.u8()? {
            0 => SiteKind::Mark { id: self.i32()? },
            1 => {
                let reason = match self.u8()? {
                    0 => InfopointReason::Safepoint,
                    1 => InfopointReason::Call,
                    2 => InfopointReason::ImplicitException,
                    3 => InfopointReason::MethodStart,
                    4 => InfopointReason::MethodEnd,
                    5 => InfopointReason::BytecodePosition,
                    r => return Err(format!("invalid infopoint reason {}", r)),
                };
                SiteKind::Infopoint {
                    reason,
                    debug_info: self.debug_info()?,
                }
            }
            2 => {
                let target = match self.u8()? {
                    0 => CallTarget::Foreign(unsafe { Address::from_usize(self.read::<u64>()? as usize) }),
                    1 => CallTarget::Method(self.method()?),
                    t => return Err(format!("invalid call target kind {}", t)),
                };
                let direct = self.bool()?;
                let debug_info = if self.bool()? { Some(self.debug_info()?) } else { None };
                SiteKind::Call {
                    target,
                    direct,
                    debug_info,
                }
            }
            3 => SiteKind::DataPatch {
                reference: self.reference()?,
            },
            4 => SiteKind::ExceptionHandler {
                handler_pos: self.u32()?,
            },
            tag => return Err(format!("invalid site kind {} at pc {}", tag, pc_offset)),
        };
        Ok(Site { pc_offset, kind })
    }

    fn assumption(&mut self) -> Result<Assumption, String> {
        Ok(match self.u8()? {
            0 => Assumption::NoFinalizableSubclass {
                receiver_type: self.klass()?,
            },
            1 => Assumption::ConcreteSubtype {
                context: self.klass()?,
                subtype: self.klass()?,
            },
            2 => Assumption::LeafType { context: self.klass()? },
            3 => Assumption::ConcreteMethod {
                context: self.klass()?,
                impl_method: self.method()?,
            },
            4 => Assumption::CallSiteTargetValue {
                call_site: self.object()?,
                method_handle: self.object()?,
            },
            tag => return Err(format!("invalid assumption kind {}", tag)),
        })
    }

    fn stack_slot(&mut self) -> Result<StackSlot, String> {
        Ok(StackSlot {
            offset: self.i32()?,
            add_frame_size: self.bool()?,
        })
    }

    fn location(&mut self) -> Result<Location, String> {
        Ok(match self.u8()? {
            0 => Location::Register(self.u16()?),
            1 => Location::Stack(self.stack_slot()?),
            tag => return Err(format!("invalid location kind {}", tag)),
        })
    }

    fn slot_kind(&mut self) -> Result<SlotKind, String> {
        Ok(match self.u8()? {
            0 => SlotKind::Illegal,
            1 => SlotKind::Int,
            2 => SlotKind::Long,
            3 => SlotKind::Float,
            4 => SlotKind::Double,
            5 => SlotKind::Object,
            k => return Err(format!("invalid slot kind {}", k)),
        })
    }

    fn value(&mut self) -> Result<JavaValue, String> {
        Ok(match self.u8()? {
            0 => JavaValue::Illegal,
            1 => JavaValue::Location(self.location()?),
            2 => {
                let type_char = self.u8()? as char;
                let ty = BasicType::from_descriptor(&type_char.to_string())
                    .ok_or_else(|| format!("invalid primitive type {}", type_char))?;
                let bits = self.i64()?;
                let value = PrimitiveValue::from_raw_bits(ty, bits)
                    .ok_or_else(|| format!("{} is not a primitive type", type_char))?;
                JavaValue::Primitive(value)
            }
            3 => JavaValue::Null,
            4 => JavaValue::Object {
                object: self.object()?,
                compressed: self.bool()?,
            },
            5 => JavaValue::Virtual(self.u32()?),
            tag => return Err(format!("invalid value kind {}", tag)),
        })
    }

    fn frame(&mut self) -> Result<BytecodeFrame, String> {
        let method = self.method()?;
        let bci = self.i32()?;
        let rethrow_exception = self.bool()?;
        let during_call = self.bool()?;
        let num_locals = self.u32()?;
        let num_stack = self.u32()?;
        let num_locks = self.u32()?;
        let values = self.list(|r| r.value())?;
        let slot_kinds = self.list(|r| r.slot_kind())?;
        let locks = self.list(|r| {
            Ok(StackLock {
                slot: r.stack_slot()?,
                eliminated: r.bool()?,
            })
        })?;
        let caller = if self.bool()? { Some(Box::new(self.frame()?)) } else { None };
        Ok(BytecodeFrame {
            method,
            bci,
            caller,
            values,
            slot_kinds,
            num_locals,
            num_stack,
            num_locks,
            locks,
            rethrow_exception,
            during_call,
        })
    }

    fn debug_info(&mut self) -> Result<DebugInfo, String> {
        let frame = if self.bool()? { Some(self.frame()?) } else { None };
        let reference_map = if self.bool()? {
            let mut map = ReferenceMap::default();
            let len = self.len()?;
            for _ in 0..len {
                map.objects.push(self.location()?);
                let base = if self.bool()? { Some(self.location()?) } else { None };
                map.derived_base.push(base);
                map.size_in_bytes.push(self.u8()?);
            }
            Some(map)
        } else {
            None
        };
        let virtual_objects = self.list(|r| {
            Ok(VirtualObject {
                id: r.u32()?,
                klass: r.klass()?,
                is_auto_box: r.bool()?,
                values: r.list(|r| r.value())?,
                slot_kinds: r.list(|r| r.slot_kind())?,
            })
        })?;
        Ok(DebugInfo {
            frame,
            reference_map,
            virtual_objects,
        })
    }
}

/// Read compiled code from a stream. Object indexes in the stream refer to `object_pool`.
pub fn decode(bytes: &[u8], object_pool: &[ObjectReference]) -> JVMCIResult<CompiledCode> {
    let mut reader = Reader {
        bytes,
        pos: 0,
        object_pool,
    };
    reader
        .compiled_code()
        .map_err(|e| JVMCIError::jvmci(format!("invalid compiled code stream: {}", e)))
}

#[derive(Default)]
struct Writer {
    bytes: Vec<u8>,
    object_pool: Vec<ObjectReference>,
}

impl Writer {
    fn put<T: Pod>(&mut self, value: T) {
        self.bytes.extend_from_slice(bytemuck::bytes_of(&value));
    }

    fn bool(&mut self, value: bool) {
        self.put(value as u8);
    }

    fn len(&mut self, len: usize) {
        self.put(len as u32);
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.len(bytes.len());
        self.bytes.extend_from_slice(bytes);
    }

    fn address(&mut self, address: Address) {
        self.put(address.as_usize() as u64);
    }

    fn object(&mut self, object: ObjectReference) {
        let index = match self.object_pool.iter().position(|o| *o == object) {
            Some(index) => index,
            None => {
                self.object_pool.push(object);
                self.object_pool.len() - 1
            }
        };
        self.put(index as u32);
    }

    fn compiled_code(&mut self, code: &CompiledCode) {
        self.put(MAGIC);
        self.put(VERSION);
        self.bytes(code.name.as_bytes());
        match code.kind {
            CompiledCodeKind::Nmethod {
                method,
                entry_bci,
                compile_id,
                has_unsafe_access,
            } => {
                self.put(0u8);
                self.address(method.0);
                self.put(entry_bci);
                self.put(compile_id);
                self.bool(has_unsafe_access);
            }
            CompiledCodeKind::RuntimeStub => self.put(1u8),
        }
        self.bytes(&code.target_code);
        self.bytes(&code.data_section);
        self.put(code.data_section_alignment);
        self.len(code.data_section_patches.len());
        for patch in code.data_section_patches.iter() {
            self.put(patch.pc_offset);
            self.reference(&patch.reference);
        }
        self.len(code.sites.len());
        for site in code.sites.iter() {
            self.site(site);
        }
        self.len(code.assumptions.len());
        for assumption in code.assumptions.iter() {
            self.assumption(assumption);
        }
        self.len(code.methods.len());
        for method in code.methods.iter() {
            self.address(method.0);
        }
        self.len(code.comments.len());
        for comment in code.comments.iter() {
            self.put(comment.pc_offset);
            self.bytes(comment.text.as_bytes());
        }
        self.put(code.total_frame_size);
        self.bool(code.deopt_rescue_slot.is_some());
        if let Some(slot) = &code.deopt_rescue_slot {
            self.stack_slot(slot);
        }
        self.bool(code.has_wide_vectors);
    }

    fn reference(&mut self, reference: &Reference) {
        match *reference {
            Reference::Object { object, compressed } => {
                self.put(0u8);
                self.object(object);
                self.bool(compressed);
            }
            Reference::Metaspace { metadata, compressed } => {
                self.put(1u8);
                self.address(metadata.address);
                self.put(match metadata.kind {
                    MetadataKind::Klass => 0u8,
                    MetadataKind::Method => 1,
                    MetadataKind::ConstantPool => 2,
                });
                self.bool(compressed);
            }
            Reference::DataSection { offset } => {
                self.put(2u8);
                self.put(offset);
            }
        }
    }

    fn site(&mut self, site: &Site) {
        self.put(site.pc_offset);
        match &site.kind {
            SiteKind::Mark { id } => {
                self.put(0u8);
                self.put(*id);
            }
            SiteKind::Infopoint { reason, debug_info } => {
                self.put(1u8);
                self.put(match reason {
                    InfopointReason::Safepoint => 0u8,
                    InfopointReason::Call => 1,
                    InfopointReason::ImplicitException => 2,
                    InfopointReason::MethodStart => 3,
                    InfopointReason::MethodEnd => 4,
                    InfopointReason::BytecodePosition => 5,
                });
                self.debug_info(debug_info);
            }
            SiteKind::Call {
                target,
                direct,
                debug_info,
            } => {
                self.put(2u8);
                match target {
                    CallTarget::Foreign(address) => {
                        self.put(0u8);
                        self.address(*address);
                    }
                    CallTarget::Method(method) => {
                        self.put(1u8);
                        self.address(method.0);
                    }
                }
                self.bool(*direct);
                self.bool(debug_info.is_some());
                if let Some(debug_info) = debug_info {
                    self.debug_info(debug_info);
                }
            }
            SiteKind::DataPatch { reference } => {
                self.put(3u8);
                self.reference(reference);
            }
            SiteKind::ExceptionHandler { handler_pos } => {
                self.put(4u8);
                self.put(*handler_pos);
            }
        }
    }

    fn assumption(&mut self, assumption: &Assumption) {
        match *assumption {
            Assumption::NoFinalizableSubclass { receiver_type } => {
                self.put(0u8);
                self.address(receiver_type.0);
            }
            Assumption::ConcreteSubtype { context, subtype } => {
                self.put(1u8);
                self.address(context.0);
                self.address(subtype.0);
            }
            Assumption::LeafType { context } => {
                self.put(2u8);
                self.address(context.0);
            }
            Assumption::ConcreteMethod { context, impl_method } => {
                self.put(3u8);
                self.address(context.0);
                self.address(impl_method.0);
            }
            Assumption::CallSiteTargetValue {
                call_site,
                method_handle,
            } => {
                self.put(4u8);
                self.object(call_site);
                self.object(method_handle);
            }
        }
    }

    fn stack_slot(&mut self, slot: &StackSlot) {
        self.put(slot.offset);
        self.bool(slot.add_frame_size);
    }

    fn location(&mut self, location: &Location) {
        match location {
            Location::Register(number) => {
                self.put(0u8);
                self.put(*number);
            }
            Location::Stack(slot) => {
                self.put(1u8);
                self.stack_slot(slot);
            }
        }
    }

    fn slot_kind(&mut self, kind: SlotKind) {
        self.put(match kind {
            SlotKind::Illegal => 0u8,
            SlotKind::Int => 1,
            SlotKind::Long => 2,
            SlotKind::Float => 3,
            SlotKind::Double => 4,
            SlotKind::Object => 5,
        });
    }

    fn value(&mut self, value: &JavaValue) {
        match value {
            JavaValue::Illegal => self.put(0u8),
            JavaValue::Location(location) => {
                self.put(1u8);
                self.location(location);
            }
            JavaValue::Primitive(p) => {
                self.put(2u8);
                let type_char: &'static str = p.basic_type().into();
                self.put(type_char.as_bytes()[0]);
                self.put(p.to_raw_bits());
            }
            JavaValue::Null => self.put(3u8),
            JavaValue::Object { object, compressed } => {
                self.put(4u8);
                self.object(*object);
                self.bool(*compressed);
            }
            JavaValue::Virtual(id) => {
                self.put(5u8);
                self.put(*id);
            }
        }
    }

    fn frame(&mut self, frame: &BytecodeFrame) {
        self.address(frame.method.0);
        self.put(frame.bci);
        self.bool(frame.rethrow_exception);
        self.bool(frame.during_call);
        self.put(frame.num_locals);
        self.put(frame.num_stack);
        self.put(frame.num_locks);
        self.len(frame.values.len());
        for value in frame.values.iter() {
            self.value(value);
        }
        self.len(frame.slot_kinds.len());
        for kind in frame.slot_kinds.iter() {
            self.slot_kind(*kind);
        }
        self.len(frame.locks.len());
        for lock in frame.locks.iter() {
            self.stack_slot(&lock.slot);
            self.bool(lock.eliminated);
        }
        self.bool(frame.caller.is_some());
        if let Some(caller) = &frame.caller {
            self.frame(caller);
        }
    }

    fn debug_info(&mut self, debug_info: &DebugInfo) {
        self.bool(debug_info.frame.is_some());
        if let Some(frame) = &debug_info.frame {
            self.frame(frame);
        }
        self.bool(debug_info.reference_map.is_some());
        if let Some(map) = &debug_info.reference_map {
            self.len(map.objects.len());
            for (i, location) in map.objects.iter().enumerate() {
                self.location(location);
                let base = map.derived_base.get(i).copied().flatten();
                self.bool(base.is_some());
                if let Some(base) = &base {
                    self.location(base);
                }
                self.put(map.size_in_bytes.get(i).copied().unwrap_or(8));
            }
        }
        self.len(debug_info.virtual_objects.len());
        for object in debug_info.virtual_objects.iter() {
            self.put(object.id);
            self.address(object.klass.0);
            self.bool(object.is_auto_box);
            self.len(object.values.len());
            for value in object.values.iter() {
                self.value(value);
            }
            self.len(object.slot_kinds.len());
            for kind in object.slot_kinds.iter() {
                self.slot_kind(*kind);
            }
        }
    }
}

/// Write compiled code to a stream. Returns the stream and the object pool it refers to.
pub fn encode(code: &CompiledCode) -> (Vec<u8>, Vec<ObjectReference>) {
    let mut writer = Writer::default();
    writer.compiled_code(code);
    (writer.bytes, writer.object_pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(raw: usize) -> Address {
        unsafe { Address::from_usize(raw) }
    }

    fn object(raw: usize) -> ObjectReference {
        ObjectReference::from_raw_address(addr(raw)).unwrap()
    }

    fn sample() -> CompiledCode {
        let method = MethodRef(addr(0x1000));
        let klass = KlassRef(addr(0x2000));
        let frame = BytecodeFrame {
            method,
            bci: 3,
            caller: None,
            values: vec![
                JavaValue::Primitive(PrimitiveValue::Double(2.5)),
                JavaValue::Illegal,
                JavaValue::Object {
                    object: object(0x8000),
                    compressed: false,
                },
                JavaValue::Virtual(0),
            ],
            slot_kinds: vec![SlotKind::Double, SlotKind::Illegal, SlotKind::Object, SlotKind::Object],
            num_locals: 4,
            num_stack: 0,
            num_locks: 0,
            locks: vec![],
            rethrow_exception: false,
            during_call: true,
        };
        CompiledCode {
            name: "sample".to_string(),
            kind: CompiledCodeKind::Nmethod {
                method,
                entry_bci: -1,
                compile_id: 7,
                has_unsafe_access: false,
            },
            target_code: vec![0x90; 32],
            data_section: vec![0; 8],
            data_section_alignment: 8,
            data_section_patches: vec![DataPatch {
                pc_offset: 0,
                reference: Reference::Object {
                    object: object(0x8000),
                    compressed: false,
                },
            }],
            sites: vec![
                Site {
                    pc_offset: 0,
                    kind: SiteKind::Mark { id: 1 },
                },
                Site {
                    pc_offset: 16,
                    kind: SiteKind::Call {
                        target: CallTarget::Foreign(addr(0x5000)),
                        direct: true,
                        debug_info: Some(DebugInfo {
                            frame: Some(frame),
                            reference_map: Some(ReferenceMap {
                                objects: vec![Location::Register(3)],
                                derived_base: vec![None],
                                size_in_bytes: vec![8],
                            }),
                            virtual_objects: vec![VirtualObject {
                                id: 0,
                                klass,
                                values: vec![],
                                slot_kinds: vec![],
                                is_auto_box: false,
                            }],
                        }),
                    },
                },
            ],
            assumptions: vec![Assumption::LeafType { context: klass }],
            methods: vec![method],
            comments: vec![Comment {
                pc_offset: 0,
                text: "entry".to_string(),
            }],
            total_frame_size: 16,
            deopt_rescue_slot: Some(StackSlot {
                offset: 8,
                add_frame_size: false,
            }),
            has_wide_vectors: false,
        }
    }

    #[test]
    fn decode_what_was_encoded() {
        let code = sample();
        let (bytes, pool) = encode(&code);
        // Both references to the object share one pool entry
        assert_eq!(pool, vec![object(0x8000)]);
        assert_eq!(decode(&bytes, &pool).unwrap(), code);
    }

    #[test]
    fn rejects_bad_streams() {
        let (bytes, pool) = encode(&sample());
        assert!(decode(&bytes[..bytes.len() - 1], &pool).is_err());
        assert!(decode(&bytes, &[]).is_err());
        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        let err = decode(&bad_magic, &pool).unwrap_err();
        assert!(err.to_string().contains("not a compiled code stream"), "{}", err);
        let mut trailing = bytes;
        trailing.push(0);
        assert!(decode(&trailing, &pool).is_err());
    }
}
