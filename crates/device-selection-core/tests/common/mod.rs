//! Catalog builders shared by the integration tests.

#![allow(dead_code)]

use device_selection_core::primitives::{CONTROLLING_FUNCTION_PREFIX, MEASURING_FUNCTION_PREFIX};
use device_selection_core::{
    Aspect, AspectIndex, Content, ContentVariable, Device, DeviceType, Function, FunctionIndex,
    Interaction, Service, ServiceGroup,
};

pub fn measuring(name: &str) -> String {
    format!("{}{}", MEASURING_FUNCTION_PREFIX, name)
}

pub fn controlling(name: &str) -> String {
    format!("{}{}", CONTROLLING_FUNCTION_PREFIX, name)
}

pub fn functions(ids: &[String]) -> FunctionIndex {
    let functions: Vec<Function> = ids
        .iter()
        .map(|id| Function {
            id: id.clone(),
            ..Function::default()
        })
        .collect();
    FunctionIndex::build(&functions, &[])
}

/// `air → {inside_air, outside_air → {morning, evening}}` and
/// `device → {cpu, gpu, case}`.
pub fn aspects() -> AspectIndex {
    AspectIndex::build(&[
        Aspect::new("air", "Air").with_children(vec![
            Aspect::new("inside_air", "Inside Air"),
            Aspect::new("outside_air", "Outside Air").with_children(vec![
                Aspect::new("morning", "Morning"),
                Aspect::new("evening", "Evening"),
            ]),
        ]),
        Aspect::new("device", "Device").with_children(vec![
            Aspect::new("cpu", "CPU"),
            Aspect::new("gpu", "GPU"),
            Aspect::new("case", "Case"),
        ]),
    ])
}

/// An unannotated structure variable.
pub fn node(name: &str, children: Vec<ContentVariable>) -> ContentVariable {
    ContentVariable {
        name: name.into(),
        value_type: "https://schema.org/StructuredValue".into(),
        sub_content_variables: children,
        ..ContentVariable::default()
    }
}

/// An annotated leaf.
pub fn leaf(name: &str, function_id: &str, aspect_id: &str) -> ContentVariable {
    ContentVariable {
        name: name.into(),
        value_type: "https://schema.org/Float".into(),
        function_id: function_id.into(),
        aspect_id: aspect_id.into(),
        ..ContentVariable::default()
    }
}

/// A scalar leaf with a preset value.
pub fn scalar(name: &str, value: serde_json::Value, characteristic_id: &str) -> ContentVariable {
    ContentVariable {
        name: name.into(),
        value_type: "https://schema.org/Integer".into(),
        characteristic_id: characteristic_id.into(),
        value: Some(value),
        ..ContentVariable::default()
    }
}

pub fn content(variable: ContentVariable) -> Content {
    Content {
        content_variable: variable,
        serialization: "json".into(),
        ..Content::default()
    }
}

pub struct ServiceBuilder(Service);

impl ServiceBuilder {
    pub fn new(id: &str) -> Self {
        Self(Service {
            id: id.into(),
            local_id: id.into(),
            name: id.into(),
            interaction: Interaction::Request,
            protocol_id: "urn:protocol:mqtt".into(),
            service_group_key: String::new(),
            inputs: vec![],
            outputs: vec![],
        })
    }

    pub fn interaction(mut self, interaction: Interaction) -> Self {
        self.0.interaction = interaction;
        self
    }

    pub fn group(mut self, key: &str) -> Self {
        self.0.service_group_key = key.into();
        self
    }

    pub fn input(mut self, variable: ContentVariable) -> Self {
        self.0.inputs.push(content(variable));
        self
    }

    pub fn output(mut self, variable: ContentVariable) -> Self {
        self.0.outputs.push(content(variable));
        self
    }

    pub fn build(self) -> Service {
        self.0
    }
}

pub fn device_type(id: &str, device_class_id: &str, services: Vec<Service>) -> DeviceType {
    DeviceType {
        id: id.into(),
        name: id.into(),
        device_class_id: device_class_id.into(),
        service_groups: vec![],
        services,
    }
}

pub fn with_groups(mut dt: DeviceType, groups: &[(&str, &str)]) -> DeviceType {
    dt.service_groups = groups
        .iter()
        .map(|(key, name)| ServiceGroup {
            key: (*key).into(),
            name: (*name).into(),
        })
        .collect();
    dt
}

pub fn device(id: &str, name: &str, device_type_id: &str) -> Device {
    Device {
        id: id.into(),
        local_id: format!("{}_local", id),
        name: name.into(),
        device_type_id: device_type_id.into(),
        owner_id: "owner".into(),
    }
}
