//! Constant-to-global conversion.
//!
//! After bufferization, compile-time constants still live on value edges.
//! This pass moves their payloads into module-level global buffers so the
//! deallocation stage never treats constant storage as a temporary.

use basalt_core::{GlobalBuffer, Module, ModulePass, Result, ValueData};

/// Turns every constant-carrying value into a reference to a module-level
/// global buffer.
pub struct ConstantsToGlobalsPass;

impl ModulePass for ConstantsToGlobalsPass {
    fn name(&self) -> &str {
        "constants-to-globals"
    }

    fn run(&self, module: &mut Module) -> Result<bool> {
        let mut changed = false;

        for func_index in 0..module.functions.len() {
            let mut conversions = Vec::new();

            {
                let function = &module.functions[func_index];
                for value_id in function.value_ids() {
                    let value = function.value(value_id)?;
                    if let ValueData::Constant(constant) = &value.data {
                        let name = format!("{}_{}", function.name, value.name);
                        conversions.push((value_id, name, constant.clone()));
                    }
                }
            }

            for (value_id, name, constant) in conversions {
                let global_id = module.add_global(GlobalBuffer {
                    name,
                    value: constant,
                });
                let value = module.functions[func_index].value_mut(value_id)?;
                value.data = ValueData::Global(global_id);
                value.allocated = false;
                changed = true;
            }
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::{ConstValue, DataType, Function, Shape, ValueDef, ValueType};

    #[test]
    fn test_constants_become_globals() {
        let mut module = Module::new("m");
        let mut func = Function::new("f");

        let c = func.add_value(ValueDef::with_constant(
            "c",
            ValueType::buffer(DataType::F32, Shape::Static(vec![2])),
            ConstValue::zeros(DataType::F32, vec![2]),
        ));
        module.add_function(func);

        let changed = ConstantsToGlobalsPass.run(&mut module).unwrap();
        assert!(changed);
        assert_eq!(module.globals.len(), 1);
        assert_eq!(module.globals[0].name, "f_c");

        let func = module.function("f").unwrap();
        let value = func.value(c).unwrap();
        assert!(value.is_global());
        assert!(!value.allocated);
    }

    #[test]
    fn test_runtime_values_untouched() {
        let mut module = Module::new("m");
        let mut func = Function::new("f");
        func.add_value(ValueDef::new(
            "x",
            ValueType::buffer(DataType::F32, Shape::Static(vec![2])),
        ));
        module.add_function(func);

        assert!(!ConstantsToGlobalsPass.run(&mut module).unwrap());
        assert!(module.globals.is_empty());
    }
}
