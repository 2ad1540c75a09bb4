//! The compiler-side classes, fields and methods the runtime uses by name.
//!
//! Each table entry is resolved once per heap: in the host heap by initializing the classes, and in
//! a remote heap by looking up and caching the JNI class, field and method ids.

use enum_map::Enum;
use strum_macros::EnumIter;

use crate::vm::{BasicType, FieldDescriptor, MethodDescriptor, MethodKind};

macro_rules! classes {
    ($($variant:ident => $name:literal,)*) => {
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Enum, EnumIter)]
        pub enum JVMCIClass {
            $($variant),*
        }

        impl JVMCIClass {
            /// The class name in internal form.
            pub const fn name(self) -> &'static str {
                match self {
                    $(JVMCIClass::$variant => $name),*
                }
            }
        }
    };
}

classes! {
    Object => "java/lang/Object",
    String => "java/lang/String",
    Class => "java/lang/Class",
    Throwable => "java/lang/Throwable",
    Boolean => "java/lang/Boolean",
    Byte => "java/lang/Byte",
    Character => "java/lang/Character",
    Short => "java/lang/Short",
    Integer => "java/lang/Integer",
    Long => "java/lang/Long",
    Float => "java/lang/Float",
    Double => "java/lang/Double",
    TranslatedException => "jdk/vm/ci/hotspot/TranslatedException",
    InstalledCode => "jdk/vm/ci/code/InstalledCode",
    HotSpotInstalledCode => "jdk/vm/ci/hotspot/HotSpotInstalledCode",
    HotSpotNmethod => "jdk/vm/ci/hotspot/HotSpotNmethod",
    HotSpotCompiledCode => "jdk/vm/ci/hotspot/HotSpotCompiledCode",
    HotSpotJVMCIRuntime => "jdk/vm/ci/hotspot/HotSpotJVMCIRuntime",
    HotSpotCompilationRequestResult => "jdk/vm/ci/hotspot/HotSpotCompilationRequestResult",
    HotSpotResolvedJavaMethodImpl => "jdk/vm/ci/hotspot/HotSpotResolvedJavaMethodImpl",
    HotSpotResolvedObjectTypeImpl => "jdk/vm/ci/hotspot/HotSpotResolvedObjectTypeImpl",
    HotSpotResolvedPrimitiveType => "jdk/vm/ci/hotspot/HotSpotResolvedPrimitiveType",
    HotSpotConstantPool => "jdk/vm/ci/hotspot/HotSpotConstantPool",
    JavaKind => "jdk/vm/ci/meta/JavaKind",
    JavaConstant => "jdk/vm/ci/meta/JavaConstant",
    HotSpotObjectConstantImpl => "jdk/vm/ci/hotspot/HotSpotObjectConstantImpl",
    DirectHotSpotObjectConstantImpl => "jdk/vm/ci/hotspot/DirectHotSpotObjectConstantImpl",
    IndirectHotSpotObjectConstantImpl => "jdk/vm/ci/hotspot/IndirectHotSpotObjectConstantImpl",
    HotSpotSpeculationLog => "jdk/vm/ci/hotspot/HotSpotSpeculationLog",
    HotSpotStackFrameReference => "jdk/vm/ci/hotspot/HotSpotStackFrameReference",
    VMField => "jdk/vm/ci/hotspot/VMField",
    VMFlag => "jdk/vm/ci/hotspot/VMFlag",
    VMIntrinsicMethod => "jdk/vm/ci/hotspot/VMIntrinsicMethod",
    CompilerToVM => "jdk/vm/ci/hotspot/CompilerToVM",
}

impl JVMCIClass {
    /// The box class of a primitive type.
    pub fn box_of(ty: BasicType) -> Option<JVMCIClass> {
        Some(match ty {
            BasicType::Boolean => JVMCIClass::Boolean,
            BasicType::Byte => JVMCIClass::Byte,
            BasicType::Char => JVMCIClass::Character,
            BasicType::Short => JVMCIClass::Short,
            BasicType::Int => JVMCIClass::Integer,
            BasicType::Long => JVMCIClass::Long,
            BasicType::Float => JVMCIClass::Float,
            BasicType::Double => JVMCIClass::Double,
            _ => return None,
        })
    }
}

macro_rules! fields {
    ($($variant:ident => $class:ident . $name:literal : $sig:literal $(, $static:ident)?;)*) => {
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Enum, EnumIter)]
        pub enum JVMCIField {
            $($variant),*
        }

        impl JVMCIField {
            pub const fn descriptor(self) -> FieldDescriptor {
                match self {
                    $(JVMCIField::$variant => FieldDescriptor {
                        class: JVMCIClass::$class.name(),
                        name: $name,
                        signature: $sig,
                        is_static: fields!(@static $($static)?),
                    }),*
                }
            }

            pub const fn class(self) -> JVMCIClass {
                match self {
                    $(JVMCIField::$variant => JVMCIClass::$class),*
                }
            }
        }
    };
    (@static static) => { true };
    (@static) => { false };
}

fields! {
    InstalledCodeAddress => InstalledCode."address": "J";
    InstalledCodeEntryPoint => InstalledCode."entryPoint": "J";
    InstalledCodeVersion => InstalledCode."version": "J";
    InstalledCodeName => InstalledCode."name": "Ljava/lang/String;";
    HotSpotInstalledCodeSize => HotSpotInstalledCode."size": "I";
    HotSpotInstalledCodeCodeStart => HotSpotInstalledCode."codeStart": "J";
    HotSpotInstalledCodeCodeSize => HotSpotInstalledCode."codeSize": "I";
    HotSpotNmethodIsDefault => HotSpotNmethod."isDefault": "Z";
    HotSpotNmethodCompileIdSnapshot => HotSpotNmethod."compileIdSnapshot": "J";
    HotSpotCompiledCodeInstallationFailureMessage => HotSpotCompiledCode."installationFailureMessage": "Ljava/lang/String;";
    HotSpotNmethodMethod => HotSpotNmethod."method": "Ljdk/vm/ci/hotspot/HotSpotResolvedJavaMethodImpl;";
    HotSpotResolvedJavaMethodImplMetadataHandle => HotSpotResolvedJavaMethodImpl."metadataHandle": "J";
    HotSpotResolvedObjectTypeImplMetadataPointer => HotSpotResolvedObjectTypeImpl."metadataPointer": "J";
    HotSpotConstantPoolMetadataHandle => HotSpotConstantPool."metadataHandle": "J";
    HotSpotResolvedPrimitiveTypeKind => HotSpotResolvedPrimitiveType."kind": "Ljdk/vm/ci/meta/JavaKind;";
    JavaKindTypeChar => JavaKind."typeChar": "C";
    JavaConstantNullPointer => JavaConstant."NULL_POINTER": "Ljdk/vm/ci/meta/JavaConstant;", static;
    HotSpotObjectConstantImplCompressed => HotSpotObjectConstantImpl."compressed": "Z";
    DirectHotSpotObjectConstantImplObject => DirectHotSpotObjectConstantImpl."object": "Ljava/lang/Object;";
    IndirectHotSpotObjectConstantImplObjectHandle => IndirectHotSpotObjectConstantImpl."objectHandle": "J";
    HotSpotSpeculationLogLastFailed => HotSpotSpeculationLog."lastFailed": "J";
    HotSpotCompilationRequestResultFailureMessage => HotSpotCompilationRequestResult."failureMessage": "Ljava/lang/String;";
    HotSpotCompilationRequestResultRetry => HotSpotCompilationRequestResult."retry": "Z";
    HotSpotCompilationRequestResultInlinedBytecodes => HotSpotCompilationRequestResult."inlinedBytecodes": "I";
    HotSpotJVMCIRuntimeCompilationLevelAdjustment => HotSpotJVMCIRuntime."compilationLevelAdjustment": "I";
    HotSpotStackFrameReferenceFrameNumber => HotSpotStackFrameReference."frameNumber": "I";
    HotSpotStackFrameReferenceStackPointer => HotSpotStackFrameReference."stackPointer": "J";
    HotSpotStackFrameReferenceBci => HotSpotStackFrameReference."bci": "I";
    HotSpotStackFrameReferenceMethod => HotSpotStackFrameReference."method": "Ljdk/vm/ci/hotspot/HotSpotResolvedJavaMethod;";
    HotSpotStackFrameReferenceLocals => HotSpotStackFrameReference."locals": "[Ljava/lang/Object;";
    HotSpotStackFrameReferenceLocalIsVirtual => HotSpotStackFrameReference."localIsVirtual": "[Z";
    HotSpotStackFrameReferenceObjectsMaterialized => HotSpotStackFrameReference."objectsMaterialized": "Z";
    BooleanValue => Boolean."value": "Z";
    ByteValue => Byte."value": "B";
    CharacterValue => Character."value": "C";
    ShortValue => Short."value": "S";
    IntegerValue => Integer."value": "I";
    LongValue => Long."value": "J";
    FloatValue => Float."value": "F";
    DoubleValue => Double."value": "D";
}

impl JVMCIField {
    /// The `value` field of a box class.
    pub fn box_value(ty: BasicType) -> Option<JVMCIField> {
        Some(match ty {
            BasicType::Boolean => JVMCIField::BooleanValue,
            BasicType::Byte => JVMCIField::ByteValue,
            BasicType::Char => JVMCIField::CharacterValue,
            BasicType::Short => JVMCIField::ShortValue,
            BasicType::Int => JVMCIField::IntegerValue,
            BasicType::Long => JVMCIField::LongValue,
            BasicType::Float => JVMCIField::FloatValue,
            BasicType::Double => JVMCIField::DoubleValue,
            _ => return None,
        })
    }

    pub fn basic_type(self) -> BasicType {
        BasicType::from_descriptor(self.descriptor().signature).unwrap_or(BasicType::Object)
    }
}

macro_rules! methods {
    ($($variant:ident => $kind:ident $class:ident . $name:literal : $sig:literal;)*) => {
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Enum, EnumIter)]
        pub enum JVMCIMethod {
            $($variant),*
        }

        impl JVMCIMethod {
            pub const fn descriptor(self) -> MethodDescriptor {
                match self {
                    $(JVMCIMethod::$variant => MethodDescriptor {
                        class: JVMCIClass::$class.name(),
                        name: $name,
                        signature: $sig,
                        kind: MethodKind::$kind,
                    }),*
                }
            }

            pub const fn class(self) -> JVMCIClass {
                match self {
                    $(JVMCIMethod::$variant => JVMCIClass::$class),*
                }
            }
        }
    };
}

methods! {
    ThrowableGetMessage => Virtual Throwable."getMessage": "()Ljava/lang/String;";
    ClassGetName => Virtual Class."getName": "()Ljava/lang/String;";
    TranslatedExceptionEncodeThrowable => Static TranslatedException."encodeThrowable": "(Ljava/lang/Throwable;)Ljava/lang/String;";
    TranslatedExceptionDecodeThrowable => Static TranslatedException."decodeThrowable": "(Ljava/lang/String;)Ljava/lang/Throwable;";
    HotSpotJVMCIRuntimeRuntime => Static HotSpotJVMCIRuntime."runtime": "()Ljdk/vm/ci/hotspot/HotSpotJVMCIRuntime;";
    HotSpotJVMCIRuntimeCompileMethod => Virtual HotSpotJVMCIRuntime."compileMethod": "(Ljdk/vm/ci/hotspot/HotSpotResolvedJavaMethod;IJI)Ljdk/vm/ci/hotspot/HotSpotCompilationRequestResult;";
    HotSpotJVMCIRuntimeAdjustCompilationLevel => Virtual HotSpotJVMCIRuntime."adjustCompilationLevel": "(Ljdk/vm/ci/hotspot/HotSpotResolvedObjectTypeImpl;Ljava/lang/String;Ljava/lang/String;ZI)I";
    HotSpotJVMCIRuntimeGetCompiler => Virtual HotSpotJVMCIRuntime."getCompiler": "()Ljdk/vm/ci/runtime/JVMCICompiler;";
    HotSpotJVMCIRuntimeBootstrapFinished => Virtual HotSpotJVMCIRuntime."bootstrapFinished": "()V";
    HotSpotJVMCIRuntimeShutdown => Virtual HotSpotJVMCIRuntime."shutdown": "()V";
    HotSpotJVMCIRuntimeCallToString => Static HotSpotJVMCIRuntime."callToString": "(Ljava/lang/Object;)Ljava/lang/String;";
    HotSpotResolvedJavaMethodImplFromMetaspace => Static HotSpotResolvedJavaMethodImpl."fromMetaspace": "(J)Ljdk/vm/ci/hotspot/HotSpotResolvedJavaMethodImpl;";
    HotSpotResolvedObjectTypeImplFromMetaspace => Static HotSpotResolvedObjectTypeImpl."fromMetaspace": "(J)Ljdk/vm/ci/hotspot/HotSpotResolvedObjectTypeImpl;";
    HotSpotConstantPoolFromMetaspace => Static HotSpotConstantPool."fromMetaspace": "(J)Ljdk/vm/ci/hotspot/HotSpotConstantPool;";
    HotSpotResolvedPrimitiveTypeForTypeChar => Static HotSpotResolvedPrimitiveType."forTypeChar": "(C)Ljdk/vm/ci/hotspot/HotSpotResolvedPrimitiveType;";
    HotSpotNmethodConstructor => Constructor HotSpotNmethod."<init>": "(Ljdk/vm/ci/hotspot/HotSpotResolvedJavaMethodImpl;Ljava/lang/String;ZJ)V";
    DirectHotSpotObjectConstantImplConstructor => Constructor DirectHotSpotObjectConstantImpl."<init>": "(Ljava/lang/Object;Z)V";
    IndirectHotSpotObjectConstantImplConstructor => Constructor IndirectHotSpotObjectConstantImpl."<init>": "(JZZ)V";
    HotSpotStackFrameReferenceConstructor => Constructor HotSpotStackFrameReference."<init>": "()V";
    VMFieldConstructor => Constructor VMField."<init>": "(Ljava/lang/String;Ljava/lang/String;JJLjava/lang/Object;)V";
    VMFlagConstructor => Constructor VMFlag."<init>": "(Ljava/lang/String;Ljava/lang/String;Ljava/lang/Object;)V";
    VMIntrinsicMethodConstructor => Constructor VMIntrinsicMethod."<init>": "(Ljava/lang/String;Ljava/lang/String;Ljava/lang/String;I)V";
    BooleanValueOf => Static Boolean."valueOf": "(Z)Ljava/lang/Boolean;";
    ByteValueOf => Static Byte."valueOf": "(B)Ljava/lang/Byte;";
    CharacterValueOf => Static Character."valueOf": "(C)Ljava/lang/Character;";
    ShortValueOf => Static Short."valueOf": "(S)Ljava/lang/Short;";
    IntegerValueOf => Static Integer."valueOf": "(I)Ljava/lang/Integer;";
    LongValueOf => Static Long."valueOf": "(J)Ljava/lang/Long;";
    FloatValueOf => Static Float."valueOf": "(F)Ljava/lang/Float;";
    DoubleValueOf => Static Double."valueOf": "(D)Ljava/lang/Double;";
}

impl JVMCIMethod {
    /// The `valueOf` factory of a box class.
    pub fn box_value_of(ty: BasicType) -> Option<JVMCIMethod> {
        Some(match ty {
            BasicType::Boolean => JVMCIMethod::BooleanValueOf,
            BasicType::Byte => JVMCIMethod::ByteValueOf,
            BasicType::Char => JVMCIMethod::CharacterValueOf,
            BasicType::Short => JVMCIMethod::ShortValueOf,
            BasicType::Int => JVMCIMethod::IntegerValueOf,
            BasicType::Long => JVMCIMethod::LongValueOf,
            BasicType::Float => JVMCIMethod::FloatValueOf,
            BasicType::Double => JVMCIMethod::DoubleValueOf,
            _ => return None,
        })
    }
}

/// The primitive type boxed by a box class.
pub(crate) const BOXED_TYPES: [BasicType; 8] = [
    BasicType::Boolean,
    BasicType::Byte,
    BasicType::Char,
    BasicType::Short,
    BasicType::Int,
    BasicType::Long,
    BasicType::Float,
    BasicType::Double,
];

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn descriptors_are_well_formed() {
        for f in JVMCIField::iter() {
            let d = f.descriptor();
            assert_eq!(d.class, f.class().name());
            assert!(BasicType::from_descriptor(d.signature).is_some(), "{:?}", f);
        }
        for m in JVMCIMethod::iter() {
            let d = m.descriptor();
            assert!(d.signature.starts_with('('), "{:?}", m);
            if d.kind == MethodKind::Constructor {
                assert_eq!(d.name, "<init>");
                assert_eq!(d.return_type(), BasicType::Void);
            }
        }
    }

    #[test]
    fn boxes() {
        for ty in BOXED_TYPES {
            let class = JVMCIClass::box_of(ty).unwrap();
            assert_eq!(Some(class.name()), ty.box_class_name());
            assert_eq!(JVMCIField::box_value(ty).unwrap().basic_type(), ty);
            assert_eq!(JVMCIMethod::box_value_of(ty).unwrap().class(), class);
        }
        assert_eq!(JVMCIClass::box_of(BasicType::Object), None);
    }
}
