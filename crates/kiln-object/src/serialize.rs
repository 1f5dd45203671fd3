use kiln_reflect::{serialize_class_def, serialize_properties};
use kiln_store::Archive;

use crate::error::ObjectResult;
use crate::graph::{SerialBody, SerialState};

/// Serialize an object body: name, outer, then the property stream and
/// native payload for instances, or the descriptor for classes.
///
/// The name and outer read back are informational; the caller keeps the
/// identity the object was created with.
pub fn serialize_object_body(ar: &mut dyn Archive, state: &mut SerialState) -> ObjectResult<()> {
    let mut name = state.name;
    let mut outer = state.outer;
    ar.serialize_name(&mut name)?;
    ar.serialize_object(&mut outer)?;

    match &mut state.body {
        SerialBody::Instance { values, native } => {
            serialize_properties(ar, &state.layout, values, &state.types)?;
            if let Some(native) = native {
                native.serialize(ar)?;
            }
        }
        SerialBody::Class(def) => serialize_class_def(ar, def)?,
        SerialBody::Package => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use kiln_reflect::{PropertyKind, PropertyValue};
    use kiln_store::{ArchiveExt, MemoryArchive};
    use kiln_types::{ClassFlags, ObjectFlags};

    use super::*;
    use crate::config::GcConfig;
    use crate::graph::{ClassBuilder, ObjectGraph};
    use crate::native::NativeObject;

    #[derive(Default)]
    struct Payload {
        blob: Vec<u8>,
    }

    impl NativeObject for Payload {
        fn serialize(&mut self, ar: &mut dyn Archive) -> ObjectResult<()> {
            let mut len = self.blob.len() as u32;
            ar.serialize_u32(&mut len)?;
            self.blob.resize(len as usize, 0);
            ar.serialize_bytes(&mut self.blob)?;
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn instance_body_roundtrip() {
        let mut g = ObjectGraph::new(&GcConfig::default());
        let class = g
            .register_class(
                ClassBuilder::new("Mesh")
                    .property("Lod", PropertyKind::Int)
                    .native(|| Box::new(Payload::default())),
            )
            .unwrap();
        let core = g.core_package();
        let src = g.construct_object(class, Some(core), None, ObjectFlags::empty()).unwrap();
        let lod = g.intern("Lod");
        g.set_property(src, lod, PropertyValue::Int(3)).unwrap();
        g.native_mut::<Payload>(src).unwrap().blob = vec![1, 2, 3, 4];

        let mut ar = MemoryArchive::writer();
        let mut state = g.take_serial_state(src).unwrap();
        serialize_object_body(&mut ar, &mut state).unwrap();
        g.restore_serial_state(state).unwrap();

        let dst = g.construct_object(class, Some(core), None, ObjectFlags::empty()).unwrap();
        let mut ar = ar.into_reader();
        let mut state = g.take_serial_state(dst).unwrap();
        serialize_object_body(&mut ar, &mut state).unwrap();
        g.restore_serial_state(state).unwrap();

        assert_eq!(g.property(dst, lod).unwrap(), &PropertyValue::Int(3));
        assert_eq!(g.native::<Payload>(dst).unwrap().blob, vec![1, 2, 3, 4]);
        assert_eq!(g.native::<Payload>(src).unwrap().blob, vec![1, 2, 3, 4]);
    }

    #[test]
    fn class_body_roundtrip() {
        let mut g = ObjectGraph::new(&GcConfig::default());
        let class = g
            .register_class(
                ClassBuilder::new("Door")
                    .flags(ClassFlags::DEPRECATED)
                    .property("Open", PropertyKind::Bool),
            )
            .unwrap();
        let mut ar = MemoryArchive::writer();
        let mut state = g.take_serial_state(class).unwrap();
        serialize_object_body(&mut ar, &mut state).unwrap();
        g.restore_serial_state(state).unwrap();

        let core = g.core_package();
        let class_class = g.class_class();
        let copy = g.construct_object(class_class, Some(core), None, ObjectFlags::empty()).unwrap();
        let mut ar = ar.into_reader();
        let mut state = g.take_serial_state(copy).unwrap();
        serialize_object_body(&mut ar, &mut state).unwrap();
        g.restore_serial_state(state).unwrap();
        g.link_class(copy).unwrap();

        let def = g.class_def(copy).unwrap();
        assert_eq!(def.super_class, Some(g.object_class()));
        assert!(def.is_deprecated());
        assert_eq!(def.slot_count(), 1);
        let instance = g.construct_object(copy, Some(core), None, ObjectFlags::empty()).unwrap();
        let open = g.intern("Open");
        assert_eq!(g.property(instance, open).unwrap(), &PropertyValue::Bool(false));
    }
}
