//! End-to-end engine tests: the lifecycle scenarios and scheduler
//! properties, driven through the public facade.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bloco::tracer::RecordingTracer;
use bloco::{
    BlockDefinition, Engine, Outcome, Registry, Resource, TraceEvent, Value, VariableRef,
};

/// Polls a condition until it holds or a generous deadline passes.
fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

fn traced_engine() -> (Engine, RecordingTracer) {
    let tracer = RecordingTracer::new();
    let engine = Engine::with_tracer(Registry::with_defaults(), Box::new(tracer.clone()));
    (engine, tracer)
}

fn scalar(id: &str) -> VariableRef {
    VariableRef::scalar(id)
}

const REPEAT_SUM: &str = r#"
<xml xmlns="https://developers.google.com/blockly/xml">
  <variables><variable id="var-x" type="">x</variable></variables>
  <block type="event_whenflagclicked" id="flag">
    <next>
      <block type="control_repeat" id="rep">
        <value name="TIMES"><shadow type="math_whole_number"><field name="NUM">3</field></shadow></value>
        <statement name="SUBSTACK">
          <block type="data_changevariableby" id="chg">
            <field name="VARIABLE" id="var-x"></field>
            <value name="VALUE"><shadow type="math_number"><field name="NUM">1</field></shadow></value>
          </block>
        </statement>
      </block>
    </next>
  </block>
</xml>
"#;

// ============================================================================
// S1: repeat-sum
// ============================================================================

#[test]
fn repeat_sum_runs_to_completion() {
    let (engine, tracer) = traced_engine();
    engine.load_program(REPEAT_SUM).unwrap();
    assert_eq!(engine.variable(&scalar("var-x")).unwrap(), Value::Num(0.0));

    engine.start(false).unwrap();
    engine.complete();

    assert_eq!(engine.variable(&scalar("var-x")).unwrap(), Value::Num(3.0));

    let events = tracer.events();
    assert!(events.contains(&TraceEvent::Broadcast {
        topic: "executor".into(),
        message: "start".into(),
    }));
    let changes = events
        .iter()
        .filter(|e| {
            matches!(e, TraceEvent::Broadcast { topic, message }
                if topic == "variable" && message == "change")
        })
        .count();
    assert_eq!(changes, 3);
    engine.stop();
}

#[test]
fn restarting_resets_variables_from_the_program() {
    let (engine, _) = traced_engine();
    engine.load_program(REPEAT_SUM).unwrap();
    engine.start(false).unwrap();
    engine.complete();
    assert_eq!(engine.variable(&scalar("var-x")).unwrap(), Value::Num(3.0));

    engine.start(false).unwrap();
    engine.complete();
    assert_eq!(engine.variable(&scalar("var-x")).unwrap(), Value::Num(3.0));
    engine.stop();
    // Variables keep their last written values after stop.
    assert_eq!(engine.variable(&scalar("var-x")).unwrap(), Value::Num(3.0));
}

// ============================================================================
// S2: stepping
// ============================================================================

#[test]
fn stepping_advances_one_boundary_at_a_time() {
    let (engine, _) = traced_engine();
    engine.load_program(REPEAT_SUM).unwrap();
    engine.start(false).unwrap();

    // The listener-spawned chain parks at the repeat block.
    assert!(eventually(|| engine.highlights() == vec!["rep".to_string()]));
    assert_eq!(engine.task_count(), 1);
    assert_eq!(engine.variable(&scalar("var-x")).unwrap(), Value::Num(0.0));

    // First step consumes the repeat boundary; the substack parks.
    engine.step();
    assert!(eventually(|| engine.highlights() == vec!["chg".to_string()]));
    assert_eq!(engine.variable(&scalar("var-x")).unwrap(), Value::Num(0.0));
    assert_eq!(engine.task_count(), 1);

    // Each further step executes one change-variable-by.
    for expected in [1.0, 2.0] {
        engine.step();
        assert!(
            eventually(|| engine.variable(&scalar("var-x")).unwrap() == Value::Num(expected)),
            "x should reach {expected}"
        );
        assert_eq!(engine.task_count(), 1);
    }

    // The last boundary runs the final change and ends the chain.
    engine.step();
    assert!(eventually(|| engine.task_count() == 0));
    assert_eq!(engine.variable(&scalar("var-x")).unwrap(), Value::Num(3.0));
    assert!(engine.highlights().is_empty());
    engine.stop();
}

// ============================================================================
// S3: broadcast handshake
// ============================================================================

#[test]
fn broadcast_handshake_between_roots() {
    let xml = r#"
<xml>
  <variables>
    <variable id="var-x" type="">x</variable>
    <variable id="var-y" type="">y</variable>
    <variable id="var-ping" type="broadcast_msg">ping</variable>
  </variables>
  <block type="event_whenflagclicked" id="a">
    <next>
      <block type="event_broadcast" id="send">
        <field name="BROADCAST_INPUT" id="var-ping" variabletype="broadcast_msg"></field>
        <next>
          <block type="data_setvariableto" id="setx">
            <field name="VARIABLE" id="var-x"></field>
            <value name="VALUE"><shadow type="math_number"><field name="NUM">1</field></shadow></value>
          </block>
        </next>
      </block>
    </next>
  </block>
  <block type="event_whenbroadcastreceived" id="b">
    <field name="BROADCAST_OPTION" id="var-ping" variabletype="broadcast_msg"></field>
    <next>
      <block type="data_setvariableto" id="sety">
        <field name="VARIABLE" id="var-y"></field>
        <value name="VALUE"><shadow type="math_number"><field name="NUM">2</field></shadow></value>
      </block>
    </next>
  </block>
</xml>
"#;
    let (engine, _) = traced_engine();
    engine.load_program(xml).unwrap();
    engine.start(false).unwrap();
    engine.complete();
    assert_eq!(engine.variable(&scalar("var-x")).unwrap(), Value::Num(1.0));
    assert_eq!(engine.variable(&scalar("var-y")).unwrap(), Value::Num(2.0));
    engine.stop();
}

// ============================================================================
// S4: math
// ============================================================================

#[test]
fn operator_blocks_compute_in_value_position() {
    let xml = r#"
<xml>
  <variables>
    <variable id="var-a" type="">a</variable>
    <variable id="var-b" type="">b</variable>
    <variable id="var-c" type="">c</variable>
  </variables>
  <block type="event_whenflagclicked" id="flag">
    <next>
      <block type="data_setvariableto" id="seta">
        <field name="VARIABLE" id="var-a"></field>
        <value name="VALUE"><block type="operator_mathop" id="m1">
          <field name="OPERATOR">sqrt</field>
          <value name="NUM"><shadow type="math_number"><field name="NUM">9</field></shadow></value>
        </block></value>
        <next>
          <block type="data_setvariableto" id="setb">
            <field name="VARIABLE" id="var-b"></field>
            <value name="VALUE"><block type="operator_add" id="m2">
              <value name="OPERAND1"><shadow type="math_number"><field name="NUM">2</field></shadow></value>
              <value name="OPERAND2"><shadow type="text"><field name="TEXT">3</field></shadow></value>
            </block></value>
            <next>
              <block type="data_setvariableto" id="setc">
                <field name="VARIABLE" id="var-c"></field>
                <value name="VALUE"><block type="operator_join" id="m3">
                  <value name="OPERAND1"><shadow type="text"><field name="TEXT">a</field></shadow></value>
                  <value name="OPERAND2"><shadow type="text"><field name="TEXT">b</field></shadow></value>
                </block></value>
              </block>
            </next>
          </block>
        </next>
      </block>
    </next>
  </block>
</xml>
"#;
    let (engine, _) = traced_engine();
    engine.load_program(xml).unwrap();
    engine.start(false).unwrap();
    engine.complete();
    assert_eq!(engine.variable(&scalar("var-a")).unwrap(), Value::Num(3.0));
    assert_eq!(engine.variable(&scalar("var-b")).unwrap(), Value::Num(5.0));
    assert_eq!(engine.variable(&scalar("var-c")).unwrap(), Value::Str("ab".into()));
    engine.stop();
}

// ============================================================================
// S5: list operations
// ============================================================================

#[test]
fn list_blocks_follow_editor_semantics() {
    let xml = r#"
<xml>
  <variables>
    <variable id="var-l" type="list">items</variable>
    <variable id="var-len" type="">len</variable>
    <variable id="var-has" type="">has</variable>
    <variable id="var-idx" type="">idx</variable>
  </variables>
  <block type="event_whenflagclicked" id="flag">
    <next>
      <block type="data_addtolist" id="add1">
        <field name="LIST" id="var-l" variabletype="list"></field>
        <value name="ITEM"><shadow type="math_number"><field name="NUM">1</field></shadow></value>
        <next>
          <block type="data_addtolist" id="add2">
            <field name="LIST" id="var-l" variabletype="list"></field>
            <value name="ITEM"><shadow type="math_number"><field name="NUM">2</field></shadow></value>
            <next>
              <block type="data_insertatlist" id="ins">
                <field name="LIST" id="var-l" variabletype="list"></field>
                <value name="INDEX"><shadow type="math_number"><field name="NUM">0</field></shadow></value>
                <value name="ITEM"><shadow type="math_number"><field name="NUM">0</field></shadow></value>
                <next>
                  <block type="data_deleteoflist" id="del">
                    <field name="LIST" id="var-l" variabletype="list"></field>
                    <value name="INDEX"><shadow type="math_number"><field name="NUM">1</field></shadow></value>
                    <next>
                      <block type="data_setvariableto" id="setlen">
                        <field name="VARIABLE" id="var-len"></field>
                        <value name="VALUE"><block type="data_lengthoflist" id="q1">
                          <field name="LIST" id="var-l" variabletype="list"></field>
                        </block></value>
                        <next>
                          <block type="data_setvariableto" id="sethas">
                            <field name="VARIABLE" id="var-has"></field>
                            <value name="VALUE"><block type="data_listcontainsitem" id="q2">
                              <field name="LIST" id="var-l" variabletype="list"></field>
                              <value name="ITEM"><shadow type="math_number"><field name="NUM">2</field></shadow></value>
                            </block></value>
                            <next>
                              <block type="data_setvariableto" id="setidx">
                                <field name="VARIABLE" id="var-idx"></field>
                                <value name="VALUE"><block type="data_itemnumoflist" id="q3">
                                  <field name="LIST" id="var-l" variabletype="list"></field>
                                  <value name="ITEM"><shadow type="math_number"><field name="NUM">5</field></shadow></value>
                                </block></value>
                              </block>
                            </next>
                          </block>
                        </next>
                      </block>
                    </next>
                  </block>
                </next>
              </block>
            </next>
          </block>
        </next>
      </block>
    </next>
  </block>
</xml>
"#;
    let (engine, _) = traced_engine();
    engine.load_program(xml).unwrap();
    engine.start(false).unwrap();
    engine.complete();

    assert_eq!(
        engine.variable(&VariableRef::new("list", "var-l")).unwrap(),
        Value::List(vec![Value::Num(0.0), Value::Num(2.0)])
    );
    assert_eq!(engine.variable(&scalar("var-len")).unwrap(), Value::Num(2.0));
    assert_eq!(engine.variable(&scalar("var-has")).unwrap(), Value::Bool(true));
    assert_eq!(engine.variable(&scalar("var-idx")).unwrap(), Value::Num(-1.0));
    engine.stop();
}

#[test]
fn list_item_access_blocks() {
    let xml = r#"
<xml>
  <variables>
    <variable id="var-l" type="list">items</variable>
    <variable id="var-v" type="">v</variable>
  </variables>
  <block type="event_whenflagclicked" id="flag">
    <next>
      <block type="data_addtolist" id="add7">
        <field name="LIST" id="var-l" variabletype="list"></field>
        <value name="ITEM"><shadow type="math_number"><field name="NUM">7</field></shadow></value>
        <next>
          <block type="data_addtolist" id="add8">
            <field name="LIST" id="var-l" variabletype="list"></field>
            <value name="ITEM"><shadow type="math_number"><field name="NUM">8</field></shadow></value>
            <next>
              <block type="data_replaceitemoflist" id="rep">
                <field name="LIST" id="var-l" variabletype="list"></field>
                <value name="INDEX"><shadow type="math_number"><field name="NUM">0</field></shadow></value>
                <value name="ITEM"><shadow type="math_number"><field name="NUM">9</field></shadow></value>
                <next>
                  <block type="data_setvariableto" id="setv">
                    <field name="VARIABLE" id="var-v"></field>
                    <value name="VALUE"><block type="data_itemoflist" id="item">
                      <field name="LIST" id="var-l" variabletype="list"></field>
                      <value name="INDEX"><shadow type="math_number"><field name="NUM">1</field></shadow></value>
                    </block></value>
                    <next>
                      <block type="data_deletealloflist" id="wipe">
                        <field name="LIST" id="var-l" variabletype="list"></field>
                      </block>
                    </next>
                  </block>
                </next>
              </block>
            </next>
          </block>
        </next>
      </block>
    </next>
  </block>
</xml>
"#;
    let (engine, _) = traced_engine();
    engine.load_program(xml).unwrap();
    engine.start(false).unwrap();
    engine.complete();
    assert_eq!(engine.variable(&scalar("var-v")).unwrap(), Value::Num(8.0));
    assert_eq!(
        engine.variable(&VariableRef::new("list", "var-l")).unwrap(),
        Value::List(vec![])
    );
    engine.stop();
}

#[test]
fn string_and_numeric_extension_blocks() {
    let xml = r#"
<xml>
  <variables>
    <variable id="var-l" type="list">parts</variable>
    <variable id="var-n" type="">numeric</variable>
    <variable id="var-s" type="">sub</variable>
  </variables>
  <block type="event_whenflagclicked" id="flag">
    <next>
      <block type="string_splitvar" id="split">
        <value name="STRING"><shadow type="text"><field name="TEXT">a,b,c</field></shadow></value>
        <value name="CHARS"><shadow type="text"><field name="TEXT">,</field></shadow></value>
        <field name="VARIABLE" id="var-l" variabletype="list"></field>
        <next>
          <block type="data_setvariableto" id="setn">
            <field name="VARIABLE" id="var-n"></field>
            <value name="VALUE"><block type="numbers_isnumeric" id="isnum">
              <value name="VALUE"><shadow type="text"><field name="TEXT">12</field></shadow></value>
            </block></value>
            <next>
              <block type="data_setvariableto" id="sets">
                <field name="VARIABLE" id="var-s"></field>
                <value name="VALUE"><block type="string_substring" id="sub">
                  <value name="START"><shadow type="math_number"><field name="NUM">1</field></shadow></value>
                  <value name="END"><shadow type="math_number"><field name="NUM">3</field></shadow></value>
                  <value name="STRING"><shadow type="text"><field name="TEXT">hello</field></shadow></value>
                </block></value>
              </block>
            </next>
          </block>
        </next>
      </block>
    </next>
  </block>
</xml>
"#;
    let (engine, _) = traced_engine();
    engine.load_program(xml).unwrap();
    engine.start(false).unwrap();
    engine.complete();
    assert_eq!(
        engine.variable(&VariableRef::new("list", "var-l")).unwrap(),
        Value::List(vec![
            Value::Str("a".into()),
            Value::Str("b".into()),
            Value::Str("c".into()),
        ])
    );
    assert_eq!(engine.variable(&scalar("var-n")).unwrap(), Value::Bool(true));
    assert_eq!(engine.variable(&scalar("var-s")).unwrap(), Value::Str("el".into()));
    engine.stop();
}

// ============================================================================
// S6: stop cancels
// ============================================================================

#[test]
fn stop_cancels_a_forever_loop() {
    let xml = r#"
<xml>
  <block type="event_whenflagclicked" id="flag">
    <next>
      <block type="control_forever" id="spin">
        <statement name="SUBSTACK"></statement>
      </block>
    </next>
  </block>
</xml>
"#;
    let (engine, _) = traced_engine();
    engine.load_program(xml).unwrap();
    engine.start(false).unwrap();

    // The forever loop parks at its first boundary.
    assert!(eventually(|| engine.task_count() == 1));

    engine.stop();
    assert!(engine.is_complete());
    assert_eq!(engine.task_count(), 0);
    assert!(engine.highlights().is_empty());
}

#[test]
fn stop_is_idempotent_in_any_state() {
    let (engine, _) = traced_engine();
    engine.stop();
    assert!(engine.is_complete());

    engine.load_program(REPEAT_SUM).unwrap();
    engine.stop();
    engine.stop();
    assert!(engine.is_complete());

    engine.start(false).unwrap();
    engine.stop();
    engine.stop();
    assert!(engine.is_complete());
    assert!(engine.highlights().is_empty());
    assert_eq!(engine.task_count(), 0);
}

// ============================================================================
// Scheduler properties
// ============================================================================

#[test]
fn steps_observe_chain_order() {
    let (engine, tracer) = traced_engine();
    engine.load_program(REPEAT_SUM).unwrap();
    engine.start(false).unwrap();
    engine.complete();
    engine.stop();

    let ids = tracer.step_ids();
    // The hat announces once; the repeat block announces before its
    // substack, and the substack announces once per iteration.
    assert_eq!(ids, vec!["flag", "rep", "chg", "chg", "chg"]);
}

#[test]
fn highlights_track_suspended_non_eager_steps() {
    let (engine, _) = traced_engine();
    engine.load_program(REPEAT_SUM).unwrap();
    engine.start(false).unwrap();

    assert!(eventually(|| engine.highlights() == vec!["rep".to_string()]));
    assert_eq!(engine.task_count(), 1);

    engine.complete();
    assert!(engine.highlights().is_empty());
    engine.stop();
}

#[test]
fn eager_start_runs_without_stepping() {
    let (engine, _) = traced_engine();
    engine.load_program(REPEAT_SUM).unwrap();
    engine.start(true).unwrap();
    // Everything is eager, so quiescence arrives without step/complete.
    assert!(eventually(|| engine.task_count() == 0));
    assert_eq!(engine.variable(&scalar("var-x")).unwrap(), Value::Num(3.0));
    engine.stop();
}

// ============================================================================
// Events from outside
// ============================================================================

#[test]
fn keyboard_broadcasts_spawn_key_listeners() {
    let xml = r#"
<xml>
  <variables><variable id="var-x" type="">x</variable></variables>
  <block type="event_whenkeypressed" id="key">
    <field name="KEY_OPTION">left arrow</field>
    <next>
      <block type="data_changevariableby" id="chg">
        <field name="VARIABLE" id="var-x"></field>
        <value name="VALUE"><shadow type="math_number"><field name="NUM">1</field></shadow></value>
      </block>
    </next>
  </block>
</xml>
"#;
    let (engine, _) = traced_engine();
    engine.load_program(xml).unwrap();
    engine.start(false).unwrap();

    engine.broadcast("keyboard", "left");
    engine.complete();
    assert_eq!(engine.variable(&scalar("var-x")).unwrap(), Value::Num(1.0));

    // A different key does not match.
    engine.broadcast("keyboard", "right");
    engine.complete();
    assert_eq!(engine.variable(&scalar("var-x")).unwrap(), Value::Num(1.0));
    engine.stop();
}

// ============================================================================
// Error isolation
// ============================================================================

#[test]
fn executor_errors_are_published_not_propagated() {
    let xml = r#"
<xml>
  <variables><variable id="var-x" type="">x</variable></variables>
  <block type="event_whenflagclicked" id="flag">
    <next>
      <block type="data_setvariableto" id="bad">
        <field name="VARIABLE" id="var-x"></field>
        <value name="VALUE"><block type="operator_divide" id="div">
          <value name="OPERAND1"><shadow type="math_number"><field name="NUM">1</field></shadow></value>
          <value name="OPERAND2"><shadow type="math_number"><field name="NUM">0</field></shadow></value>
        </block></value>
      </block>
    </next>
  </block>
</xml>
"#;
    let (engine, tracer) = traced_engine();
    engine.load_program(xml).unwrap();
    engine.start(false).unwrap();
    engine.complete();

    let errors: Vec<String> = tracer
        .events()
        .into_iter()
        .filter_map(|e| match e {
            TraceEvent::Broadcast { topic, message } if topic == "error" => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("ExecutionError:"));
    // The failing task is gone; the engine itself keeps serving.
    assert_eq!(engine.task_count(), 0);
    assert_eq!(engine.variable(&scalar("var-x")).unwrap(), Value::Num(0.0));
    engine.stop();
}

#[test]
fn runaway_repeat_trips_the_iteration_limit() {
    let xml = r#"
<xml>
  <block type="event_whenflagclicked" id="flag">
    <next>
      <block type="control_repeat" id="spin">
        <value name="TIMES"><shadow type="math_number"><field name="NUM">200000</field></shadow></value>
        <statement name="SUBSTACK"></statement>
      </block>
    </next>
  </block>
</xml>
"#;
    let (engine, tracer) = traced_engine();
    engine.load_program(xml).unwrap();
    engine.start(false).unwrap();
    engine.complete();

    assert!(tracer.events().iter().any(|e| matches!(
        e,
        TraceEvent::Broadcast { topic, message }
            if topic == "error" && message.starts_with("IterationLimitExceeded")
    )));
    assert_eq!(engine.task_count(), 0);
    engine.stop();
}

// ============================================================================
// Plugin contexts and extension blocks
// ============================================================================

#[derive(Debug)]
struct ProbeResource {
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Resource for ProbeResource {
    fn acquire(&mut self, _engine: &bloco::EngineHandle) -> Result<(), bloco::ExecError> {
        self.log.lock().unwrap().push("acquire");
        Ok(())
    }

    fn release(&mut self) {
        self.log.lock().unwrap().push("release");
    }

    fn as_any(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[test]
fn plugin_contexts_scope_the_run_and_serve_blocks() {
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let mut registry = Registry::with_defaults();
    registry.register(
        BlockDefinition::new("demo_probe", |ctx, _args| {
            let resource = ctx.plugin_context("probe")?;
            let probe = resource
                .as_any()
                .downcast_mut::<ProbeResource>()
                .ok_or_else(|| bloco::ExecError::execution("probe has the wrong type"))?;
            probe.log.lock().unwrap().push("block");
            Ok(Outcome::next())
        })
        .can_run(),
    );

    let engine = Engine::new(registry);
    let factory_log = Arc::clone(&log);
    engine.add_plugin(
        "probe",
        Box::new(move || -> Box<dyn Resource> {
            Box::new(ProbeResource {
                log: Arc::clone(&factory_log),
            })
        }),
    );

    engine.load_program(r#"<xml><block type="demo_probe" id="p"></block></xml>"#).unwrap();
    engine.start(false).unwrap();
    engine.complete();
    engine.stop();

    assert_eq!(*log.lock().unwrap(), vec!["acquire", "block", "release"]);
}

#[test]
fn plugin_threads_reach_the_engine_through_the_handle() {
    let (engine, _) = traced_engine();
    engine.load_program(
        r#"
<xml>
  <variables><variable id="var-x" type="">x</variable></variables>
  <block type="event_whenkeypressed" id="key">
    <field name="KEY_OPTION">any</field>
    <next>
      <block type="data_changevariableby" id="chg">
        <field name="VARIABLE" id="var-x"></field>
        <value name="VALUE"><shadow type="math_number"><field name="NUM">1</field></shadow></value>
      </block>
    </next>
  </block>
</xml>
"#,
    )
    .unwrap();
    engine.start(false).unwrap();

    let handle = engine.handle();
    let sender = std::thread::spawn(move || {
        handle.broadcast("keyboard", "x");
    });
    sender.join().unwrap();

    assert!(eventually(|| {
        engine.complete();
        engine.variable(&scalar("var-x")).unwrap() == Value::Num(1.0)
    }));
    engine.stop();
}
